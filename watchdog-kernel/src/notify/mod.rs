/**
 * NOTIFICATIONS - Alertes opérateurs dédupliquées et livrées en tâche de fond
 *
 * RÔLE :
 * Les monitors produisent des `Notification` ; la file les déduplique par
 * (vm, statut), puis un pool fixe de workers les livre à l'API de chat.
 *
 * FONCTIONNEMENT :
 * - Priorité Critical = jamais dédupliquée
 * - Low/Normal = supprimée si déjà envoyée dans la fenêtre (5 min par défaut)
 * - File pleine = message perdu + warning, le monitor n'est jamais bloqué
 * - Échec de livraison = loggé, jamais rejoué
 */

pub mod dedup;
pub mod queue;
pub mod telegram;

pub use dedup::Deduplicator;
pub use queue::{NotificationQueue, QueueSettings};
pub use telegram::TelegramNotifier;

use crate::status::VmStatus;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Priority {
    Low,
    Normal,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub vm_name: String,
    pub status: VmStatus,
    pub message: String,
    pub priority: Priority,
}

impl Notification {
    pub fn new(vm_name: impl Into<String>, status: VmStatus, priority: Priority, message: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            status,
            message: message.into(),
            priority,
        }
    }

    /// Clé de déduplication.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.vm_name, self.status)
    }
}

/// Résultat d'une mise en file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Doublon dans la fenêtre de déduplication.
    Suppressed,
    /// File saturée.
    Dropped,
    /// File fermée (arrêt en cours).
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("chat API returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("delivery timed out")]
    Timeout,
    #[error("delivery cancelled")]
    Cancelled,
}

// l'URL de l'API de chat contient le token du bot : jamais dans l'erreur
impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Http(e.without_url())
    }
}

/// Canal de livraison externe (API de chat).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Point d'entrée des monitors : toujours non bloquant.
pub trait AlertSink: Send + Sync {
    fn enqueue(&self, notification: Notification) -> EnqueueOutcome;
}
