use super::{AlertSink, Deduplicator, EnqueueOutcome, Notification, Notifier, NotifyError, Priority};
use crate::health::HealthTracker;
use crate::pool::{task, PoolError, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub capacity: usize,
    pub dedup_window: Duration,
    pub send_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            capacity: 100,
            dedup_window: Duration::from_secs(5 * 60),
            send_timeout: Duration::from_secs(10),
        }
    }
}

pub struct NotificationQueue {
    pool: WorkerPool,
    dedup: Arc<Deduplicator>,
    notifier: Arc<dyn Notifier>,
    send_timeout: Duration,
    health: HealthTracker,
    sweeper_cancel: CancellationToken,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NotificationQueue {
    /// Démarre les workers de livraison et le balayage du dédupliqueur.
    pub fn start(notifier: Arc<dyn Notifier>, settings: QueueSettings, health: HealthTracker) -> Self {
        let dedup = Arc::new(Deduplicator::new(settings.dedup_window));
        let sweeper_cancel = CancellationToken::new();
        let sweeper = dedup.spawn_sweeper(sweeper_cancel.clone());

        info!(
            workers = settings.workers,
            capacity = settings.capacity,
            dedup_window_s = settings.dedup_window.as_secs(),
            "notification queue started"
        );

        Self {
            pool: WorkerPool::start("notifications", settings.workers, settings.capacity),
            dedup,
            notifier,
            send_timeout: settings.send_timeout,
            health,
            sweeper_cancel,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        }
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Arrêt : refuse les nouvelles alertes, vide la file (au plus `grace`),
    /// puis stoppe le balayage.
    pub async fn shutdown(&self, grace: Duration) {
        let drained = self.pool.shutdown(grace).await;
        self.sweeper_cancel.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        let stats = self.pool.stats();
        info!(drained, delivered = stats.completed, failed = stats.failed, "notification queue stopped");
    }

    fn delivery(&self, notification: Notification) -> crate::pool::Task {
        let notifier = self.notifier.clone();
        let health = self.health.clone();
        let timeout = self.send_timeout;
        task(move |cancel| async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(NotifyError::Cancelled),
                res = tokio::time::timeout(timeout, notifier.send(&notification.message)) => {
                    res.unwrap_or(Err(NotifyError::Timeout))
                }
            };
            match result {
                Ok(()) => {
                    health.record_notification_sent();
                    info!(
                        vm = %notification.vm_name,
                        status = %notification.status,
                        priority = %notification.priority,
                        "alert sent"
                    );
                    Ok(())
                }
                Err(e) => {
                    health.record_notification_failed();
                    error!(
                        vm = %notification.vm_name,
                        status = %notification.status,
                        error = %e,
                        "failed to send alert"
                    );
                    Err(e.into())
                }
            }
        })
    }
}

impl AlertSink for NotificationQueue {
    fn enqueue(&self, notification: Notification) -> EnqueueOutcome {
        if self.pool.is_closed() {
            debug!(vm = %notification.vm_name, "notification queue closed, dropping alert");
            return EnqueueOutcome::Closed;
        }

        let key = notification.dedup_key();
        let deduplicated = notification.priority != Priority::Critical;
        if deduplicated && !self.dedup.check_and_mark(&key) {
            self.health.record_notification_suppressed();
            debug!(vm = %notification.vm_name, status = %notification.status, "skipping duplicate notification");
            return EnqueueOutcome::Suppressed;
        }

        let vm = notification.vm_name.clone();
        let status = notification.status;
        match self.pool.try_submit(self.delivery(notification)) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(e) => {
                // marquée mais jamais livrée : la prochaine occurrence doit passer
                if deduplicated {
                    self.dedup.forget(&key);
                }
                match e {
                    PoolError::Full => {
                        self.health.record_notification_dropped();
                        warn!(vm = %vm, status = %status, "notification queue full, dropping message");
                        EnqueueOutcome::Dropped
                    }
                    PoolError::Closed => EnqueueOutcome::Closed,
                }
            }
        }
    }
}
