/**
 * WORKER POOL - Exécuteur générique à concurrence bornée
 *
 * RÔLE :
 * Nombre fixe de workers tokio qui vident une file bornée de tâches async.
 * Utilisé par la file de notifications pour livrer les alertes.
 *
 * FONCTIONNEMENT :
 * - `submit` attend une place libre, `try_submit` échoue tout de suite si plein
 * - `shutdown` ferme d'abord la file (plus aucune soumission acceptée), laisse
 *   les workers vider les tâches restantes, puis annule de force après le délai
 */

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Une tâche reçoit le token d'annulation du pool.
pub type Task = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool queue is full")]
    Full,
    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

pub struct WorkerPool {
    name: &'static str,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Démarre `workers` workers sur une file de `capacity` tâches.
    pub fn start(name: &'static str, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            let rx = rx.clone();
            let cancel = cancel.clone();
            let counters = counters.clone();
            set.spawn(async move {
                loop {
                    // le verrou n'est tenu que pendant l'attente d'une tâche
                    let next = { rx.lock().await.recv().await };
                    let Some(task) = next else { break };
                    match task(cancel.child_token()).await {
                        Ok(()) => {
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            debug!(pool = name, worker = id, error = %e, "task failed");
                        }
                    }
                }
                debug!(pool = name, worker = id, "worker exiting");
            });
        }

        Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(set),
            cancel,
            counters,
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Task>, PoolError> {
        self.sender.lock().clone().ok_or(PoolError::Closed)
    }

    /// Soumission bloquante : attend une place dans la file.
    pub async fn submit(&self, task: Task) -> Result<(), PoolError> {
        let tx = self.sender()?;
        tokio::select! {
            res = tx.send(task) => res.map_err(|_| PoolError::Closed),
            _ = self.cancel.cancelled() => Err(PoolError::Closed),
        }
    }

    /// Soumission non bloquante.
    pub fn try_submit(&self, task: Task) -> Result<(), PoolError> {
        let tx = self.sender()?;
        tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Full,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Ferme la file puis attend la fin des workers, au plus `grace`.
    /// Retourne `false` si l'arrêt a dû être forcé.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        // 1. plus de nouvelles soumissions
        self.sender.lock().take();

        // 2. drain des tâches restantes
        let mut set = self.workers.lock().await;
        let drained = tokio::time::timeout(grace, async {
            while set.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        // 3. arrêt forcé
        if !drained {
            warn!(pool = self.name, grace_ms = grace.as_millis() as u64, "workers did not drain in time, aborting");
            self.cancel.cancel();
            set.abort_all();
            while set.join_next().await.is_some() {}
        }
        drained
    }
}

/// Emballe une closure async en `Task`.
pub fn task<F, Fut>(f: F) -> Task
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |token| Box::pin(f(token)))
}
