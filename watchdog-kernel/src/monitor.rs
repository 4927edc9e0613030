/**
 * RESOURCE MONITOR - Boucle de contrôle indépendante pour une VM
 *
 * RÔLE :
 * Probe la VM, réconcilie son statut avec l'API cloud, déclenche la
 * remédiation (démarrage) et les alertes sur chaque transition notable.
 *
 * FONCTIONNEMENT (un tick) :
 * 1. Période de grâce active (VM en cours de boot) → tick ignoré
 * 2. IP connue → probe léger ; succès = VM vivante, pas d'appel API
 * 3. Sinon → appel API (source de vérité), mise à jour IP, réconciliation
 * 4. Prochain tick planisé selon l'intervalle adaptatif du statut
 *
 * Un tick n'est planifié qu'une fois le précédent terminé : pas de
 * chevauchement pour une même VM. Aucune erreur ne termine la boucle,
 * seule l'annulation globale l'arrête.
 */

use crate::cloud::{ApiError, ControlApi, StartOutcome};
use crate::health::HealthTracker;
use crate::notify::{AlertSink, Notification, Priority};
use crate::probe::Prober;
use crate::retry::{with_backoff, BackoffPolicy, RetryError};
use crate::state::SharedRegistry;
use crate::status::{is_valid_transition, VmStatus};
use crate::store::VmRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub grace_period: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Collaborateurs partagés par tous les monitors.
#[derive(Clone)]
pub struct MonitorDeps {
    pub api: Arc<dyn ControlApi>,
    pub prober: Arc<dyn Prober>,
    pub alerts: Arc<dyn AlertSink>,
    pub health: HealthTracker,
}

/// Ce qu'a fait un tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    GraceSkip,
    ProbeOk,
    Recovered,
    ApiFailed,
    Reconciled(VmStatus),
}

#[derive(Debug, thiserror::Error)]
enum StartError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0}")]
    Rejected(String),
}

enum StartAccepted {
    Started,
    AlreadyRunning(Option<String>),
}

pub struct ResourceMonitor {
    idx: usize,
    name: String,
    url: String,
    registry: SharedRegistry,
    deps: MonitorDeps,
    settings: MonitorSettings,
    persist_tx: mpsc::Sender<String>,
    status: VmStatus,
    last_change: Instant,
    last_api_check: Option<Instant>,
    grace_until: Option<Instant>,
}

impl ResourceMonitor {
    pub fn new(
        idx: usize,
        record: &VmRecord,
        registry: SharedRegistry,
        deps: MonitorDeps,
        settings: MonitorSettings,
        persist_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            idx,
            name: record.name.clone(),
            url: record.url.clone(),
            registry,
            deps,
            settings,
            persist_tx,
            status: VmStatus::Unknown,
            last_change: Instant::now(),
            last_api_check: None,
            grace_until: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub fn grace_until(&self) -> Option<Instant> {
        self.grace_until
    }

    pub fn last_api_check(&self) -> Option<Instant> {
        self.last_api_check
    }

    pub fn next_delay(&self) -> Duration {
        self.status
            .check_interval(self.settings.min_interval, self.settings.max_interval)
    }

    /// Boucle principale, jusqu'à annulation.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(vm = %self.name, url = %self.url, "starting VM monitor");
        while !cancel.is_cancelled() {
            self.tick(&cancel).await;
            let delay = self.next_delay();
            debug!(vm = %self.name, status = %self.status, delay_ms = delay.as_millis() as u64, "next check scheduled");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(vm = %self.name, "VM monitor stopping");
    }

    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickOutcome {
        if let Some(until) = self.grace_until {
            let now = Instant::now();
            if now < until {
                let left = Duration::from_secs((until - now).as_secs());
                info!(
                    vm = %self.name,
                    status = %self.status,
                    time_left = %humantime::format_duration(left),
                    "grace period active, skipping check"
                );
                return TickOutcome::GraceSkip;
            }
            self.grace_until = None;
        }

        debug!(vm = %self.name, status = %self.status, "checking VM");

        // 1. probe d'abord (gratuit), API seulement si nécessaire
        if let Some(ip) = self.registry.ip(self.idx) {
            let reachable = self.deps.prober.probe(&ip).await;
            self.deps.health.record_probe(reachable);
            if reachable {
                return self.on_probe_success(&ip);
            }
            warn!(vm = %self.name, ip = %ip, "probe failed, checking API");
        }

        // 2. vérification autoritaire
        self.last_api_check = Some(Instant::now());
        self.registry.mark_api_check(self.idx);
        let info = match self.deps.api.info(&self.url).await {
            Ok(info) => {
                self.deps.health.record_api_call(true);
                info
            }
            Err(e) => {
                self.deps.health.record_api_call(false);
                error!(vm = %self.name, error = %e, "failed to get VM info");
                return TickOutcome::ApiFailed;
            }
        };
        info!(
            vm = %self.name,
            status = %info.status,
            ip = info.ip.as_deref().unwrap_or("-"),
            "API response"
        );

        if let Some(ip) = info.ip.as_deref() {
            self.update_ip(ip);
        }
        self.reconcile(cancel, info.status).await;
        TickOutcome::Reconciled(info.status)
    }

    fn on_probe_success(&mut self, ip: &str) -> TickOutcome {
        if self.status == VmStatus::Running {
            debug!(vm = %self.name, ip = %ip, "probe OK");
            return TickOutcome::ProbeOk;
        }

        let old = self.status;
        self.set_status(VmStatus::Running);
        self.grace_until = None;

        if old == VmStatus::Unknown {
            info!(vm = %self.name, ip = %ip, "VM initialized as Running");
        } else {
            info!(vm = %self.name, ip = %ip, old_status = %old, "VM recovered via probe");
            self.alert(
                VmStatus::Running,
                Priority::Critical,
                format!("✅ RECOVERY: VM *{}* is back online.\n\nCheck: probe OK on {}", self.name, ip),
            );
        }
        TickOutcome::Recovered
    }

    async fn reconcile(&mut self, cancel: &CancellationToken, new: VmStatus) {
        let old = self.status;
        if old == new {
            if new.should_remediate() {
                // toujours en panne : nouvelle tentative, alerte bornée par la dédup
                self.remediate(cancel, new, Priority::Normal).await;
            } else {
                self.check_stuck();
            }
            return;
        }

        if !is_valid_transition(old, new) {
            warn!(vm = %self.name, from = %old, to = %new, "unexpected status transition");
        }
        self.set_status(new);
        info!(vm = %self.name, old_status = %old, new_status = %new, "VM status changed");

        if new.should_remediate() {
            self.remediate(cancel, new, Priority::Critical).await;
        } else if new == VmStatus::Running {
            self.grace_until = None;
            if old != VmStatus::Unknown {
                self.alert(
                    VmStatus::Running,
                    Priority::Critical,
                    format!("✅ RECOVERY: VM *{}* is back online.\n\nAPI status: Running", self.name),
                );
            }
        } else if new.is_transitional() {
            info!(vm = %self.name, status = %new, "VM in transitional state");
        }
    }

    /// Alerte puis démarrage avec backoff. `priority` vaut Critical sur la
    /// transition, Normal quand le statut critique persiste.
    async fn remediate(&mut self, cancel: &CancellationToken, status: VmStatus, priority: Priority) {
        error!(vm = %self.name, status = %status, "VM in critical status");
        let emoji = match status {
            VmStatus::Crashed => "💥",
            VmStatus::Error => "⚠️",
            _ => "🚨",
        };
        let message = if priority == Priority::Critical {
            format!("{} FAILURE: VM *{}* is down.\n\nStatus: {}", emoji, self.name, status)
        } else {
            format!("{} FAILURE: VM *{}* is still down.\n\nStatus: {}", emoji, self.name, status)
        };
        self.alert(status, priority, message);

        info!(vm = %self.name, "attempting to start VM");
        self.deps.health.record_remediation();
        let api = self.deps.api.clone();
        let health = self.deps.health.clone();
        let url = self.url.clone();
        let result = with_backoff(cancel, &self.settings.backoff, || {
            let api = api.clone();
            let health = health.clone();
            let url = url.clone();
            async move {
                let outcome = api.start(&url).await;
                health.record_api_call(outcome.is_ok());
                match outcome? {
                    StartOutcome::Started => Ok(StartAccepted::Started),
                    StartOutcome::AlreadyRunning { ip } => Ok(StartAccepted::AlreadyRunning(ip)),
                    StartOutcome::Rejected(msg) => Err(StartError::Rejected(msg)),
                }
            }
        })
        .await;

        match result {
            Ok(StartAccepted::AlreadyRunning(ip)) => {
                if let Some(ip) = ip.as_deref() {
                    self.update_ip(ip);
                }
                info!(vm = %self.name, "VM was already running");
            }
            Ok(StartAccepted::Started) => {
                let grace = self.settings.grace_period;
                self.grace_until = Instant::now().checked_add(grace);
                if self.grace_until.is_none() {
                    warn!(vm = %self.name, "grace period out of range, not applied");
                }
                info!(vm = %self.name, grace_period = %humantime::format_duration(grace), "VM start initiated");
                self.alert(
                    VmStatus::Starting,
                    Priority::Critical,
                    format!("🚀 Auto-start: VM *{}* is being started via API.", self.name),
                );
            }
            Err(RetryError::Cancelled) => {
                info!(vm = %self.name, "start cancelled by shutdown");
            }
            Err(e) => {
                error!(vm = %self.name, error = %e, "failed to start VM");
            }
        }
    }

    /// Alerte si un statut transitoire dure plus que son timeout.
    /// Peut se répéter à chaque tick, la déduplication borne le volume.
    fn check_stuck(&self) {
        if !self.status.is_transitional() {
            return;
        }
        let timeout = self.status.stuck_timeout();
        if timeout.is_zero() {
            return;
        }
        let since = self.last_change.elapsed();
        if since > timeout {
            let since = Duration::from_secs(since.as_secs());
            warn!(
                vm = %self.name,
                status = %self.status,
                duration = %humantime::format_duration(since),
                "VM stuck in transitional status"
            );
            self.alert(
                self.status,
                Priority::Normal,
                format!(
                    "⚠️ WARNING: VM *{}* stuck in status {} for more than {}",
                    self.name,
                    self.status,
                    humantime::format_duration(since)
                ),
            );
        }
    }

    fn set_status(&mut self, status: VmStatus) {
        self.status = status;
        self.last_change = Instant::now();
        self.registry.set_status(self.idx, status);
    }

    fn update_ip(&self, ip: &str) {
        let Some(old) = self.registry.set_ip(self.idx, ip) else { return };
        info!(
            vm = %self.name,
            old_ip = old.as_deref().unwrap_or("-"),
            new_ip = %ip,
            "IP address updated"
        );
        // signal best-effort : plusieurs changements avant le flush n'en font qu'un
        if self.persist_tx.try_send(self.name.clone()).is_err() {
            debug!(vm = %self.name, "persist signal coalesced");
        }
    }

    fn alert(&self, status: VmStatus, priority: Priority, message: String) {
        let outcome = self
            .deps
            .alerts
            .enqueue(Notification::new(self.name.clone(), status, priority, message));
        debug!(vm = %self.name, status = %status, ?outcome, "alert enqueued");
    }
}
