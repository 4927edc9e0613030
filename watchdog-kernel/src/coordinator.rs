/**
 * COORDINATOR - Orchestration de la flotte de monitors
 *
 * RÔLE :
 * Construit le registre partagé, lance un `ResourceMonitor` par VM et
 * persiste les changements d'adresse IP vers le store.
 *
 * PERSISTANCE :
 * - Les monitors signalent un changement d'IP via un canal borné (try_send)
 * - Canal plein = signal fusionné : plusieurs changements, un seul flush
 * - Flush périodique seulement si un changement est en attente
 * - Flush final quand tous les monitors sont sortis (canal fermé)
 */

use crate::monitor::{MonitorDeps, MonitorSettings, ResourceMonitor};
use crate::state::{Registry, SharedRegistry};
use crate::store::{ResourceStore, VmRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PERSIST_CHANNEL_SIZE: usize = 10;

pub struct Coordinator {
    registry: SharedRegistry,
    monitors: JoinSet<()>,
    persister: JoinHandle<()>,
}

impl Coordinator {
    /// Lance les monitors et la tâche de persistance.
    pub fn start(
        records: Vec<VmRecord>,
        store: Arc<dyn ResourceStore>,
        deps: MonitorDeps,
        settings: MonitorSettings,
        persist_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let registry = Registry::new(records.clone());
        let (persist_tx, persist_rx) = mpsc::channel(PERSIST_CHANNEL_SIZE);

        let mut monitors = JoinSet::new();
        for (idx, record) in records.iter().enumerate() {
            let monitor = ResourceMonitor::new(
                idx,
                record,
                registry.clone(),
                deps.clone(),
                settings.clone(),
                persist_tx.clone(),
            );
            monitors.spawn(monitor.run(cancel.child_token()));
        }
        // seuls les monitors tiennent un sender : leur sortie ferme le canal
        drop(persist_tx);

        info!(count = records.len(), "started VM monitors");

        let persister = tokio::spawn(run_persister(
            registry.clone(),
            store,
            persist_rx,
            persist_interval,
        ));

        Self { registry, monitors, persister }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Attend la sortie des monitors (après annulation), au plus `timeout`.
    ///
    /// Au-delà, les monitors restants sont avortés. Retourne `false` dans ce
    /// cas. Le flush final a lieu dans les deux cas.
    pub async fn wait(self, timeout: Duration) -> bool {
        let Self { mut monitors, persister, .. } = self;

        let clean = tokio::time::timeout(timeout, drain(&mut monitors)).await.is_ok();
        if !clean {
            warn!(
                remaining = monitors.len(),
                timeout = %humantime::format_duration(timeout),
                "monitors did not stop in time, forcing shutdown"
            );
            monitors.shutdown().await;
        }

        if let Err(e) = persister.await {
            error!(error = %e, "persist task failed");
        }
        info!(clean, "all VM monitors stopped");
        clean
    }
}

async fn drain(monitors: &mut JoinSet<()>) {
    while let Some(res) = monitors.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                error!(error = %e, "VM monitor panicked");
            }
        }
    }
}

async fn run_persister(
    registry: SharedRegistry,
    store: Arc<dyn ResourceStore>,
    mut rx: mpsc::Receiver<String>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = false;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(vm) => {
                    debug!(vm = %vm, "IP change pending");
                    pending = true;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if pending {
                    pending = !flush(&registry, store.as_ref()).await;
                }
            }
        }
    }

    if pending {
        info!("saving pending IP changes before exit");
        flush(&registry, store.as_ref()).await;
    }
    debug!("persist task stopped");
}

/// Sauvegarde la liste complète ; `true` si réussie.
async fn flush(registry: &Registry, store: &dyn ResourceStore) -> bool {
    // copie sous verrou, écriture hors verrou
    let records = registry.records();
    match store.save(&records).await {
        Ok(()) => {
            info!(count = records.len(), "VM list saved");
            true
        }
        Err(e) => {
            error!(error = %e, "failed to save VM list");
            false
        }
    }
}
