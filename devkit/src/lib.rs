/*!
# Watchdog DevKit - Faux serveurs pour tests d'intégration

Bibliothèque facilitant les tests du watchdog sans réseau externe:
- `FakeGateway` : passerelle de contrôle des VMs (`/info`, `/start`) programmable
- `FakeTelegram` : API de chat qui enregistre chaque `sendMessage`
- `wait_until` : attente bornée d'une condition
*/

pub mod gateway;
pub mod telegram;

pub use gateway::{FakeGateway, StartBehavior};
pub use telegram::{FakeTelegram, SentMessage};

use anyhow::Result;
use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Sert `router` sur un port éphémère local ; retourne l'URL de base.
pub(crate) async fn spawn_server(router: Router) -> Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "fake server stopped");
        }
    });
    Ok((format!("http://{addr}"), handle))
}

/// Réévalue `check` toutes les 20ms jusqu'à `true` ou expiration.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
