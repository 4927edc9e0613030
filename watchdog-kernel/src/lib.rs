/**
 * VM WATCHDOG - Surveillance et auto-réparation d'une flotte de VMs cloud
 *
 * RÔLE :
 * Un monitor par VM probe l'adresse connue, confirme via l'API de contrôle,
 * redémarre les VMs arrêtées/plantées et alerte les opérateurs sur un chat.
 *
 * ARCHITECTURE :
 * config → coordinator → monitors (1 tâche/VM) → notify (file + workers)
 * Registre partagé sous verrou unique, persistance périodique des IPs.
 */

pub mod cloud;
pub mod config;
pub mod coordinator;
pub mod health;
pub mod http;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod probe;
pub mod retry;
pub mod state;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;
