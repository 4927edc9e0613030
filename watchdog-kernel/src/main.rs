/**
 * VM WATCHDOG - Point d'entrée du daemon
 *
 * RÔLE : Chargement config + liste des VMs, câblage des clients, de la file
 * d'alertes, du coordinator et de l'API de statut. Arrêt ordonné sur signal.
 */

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vm_watchdog::cloud::HttpControlApi;
use vm_watchdog::config::{ProbeMode, Settings};
use vm_watchdog::coordinator::Coordinator;
use vm_watchdog::health::HealthTracker;
use vm_watchdog::http::{self, AppState};
use vm_watchdog::monitor::MonitorDeps;
use vm_watchdog::notify::{NotificationQueue, TelegramNotifier};
use vm_watchdog::probe::{IcmpProber, Prober, TcpProber};
use vm_watchdog::store::{ResourceStore, YamlStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vm_watchdog=info")))
        .init();

    // .env optionnel
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env");
        }
    }

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(
        vms_file = %settings.vms_file.display(),
        min_interval = %humantime::format_duration(settings.min_check_interval),
        max_interval = %humantime::format_duration(settings.max_check_interval),
        probe_mode = ?settings.probe_mode,
        "starting VM watchdog"
    );

    let store: Arc<dyn ResourceStore> = Arc::new(YamlStore::new(&settings.vms_file));
    let records = store.load().await.context("failed to load VM list")?;
    if records.is_empty() {
        warn!("no VMs configured, monitoring nothing");
    }

    let health = HealthTracker::new();
    let notifier = TelegramNotifier::new(
        &settings.telegram_api_url,
        &settings.bot_token,
        settings.chat_id,
        settings.topic_id,
    )
    .context("failed to build chat client")?;
    let queue = Arc::new(NotificationQueue::start(
        Arc::new(notifier),
        settings.queue_settings(),
        health.clone(),
    ));

    let api = HttpControlApi::new(settings.api_rate_limit).context("failed to build control API client")?;
    let prober: Arc<dyn Prober> = match settings.probe_mode {
        ProbeMode::Tcp => Arc::new(TcpProber::new(settings.probe_port, settings.probe_policy())),
        ProbeMode::Icmp => Arc::new(IcmpProber::new(settings.probe_policy())),
    };
    let deps = MonitorDeps {
        api: Arc::new(api),
        prober,
        alerts: queue.clone(),
        health: health.clone(),
    };

    let cancel = CancellationToken::new();
    let coordinator = Coordinator::start(
        records,
        store,
        deps,
        settings.monitor_settings(),
        settings.persist_interval,
        cancel.clone(),
    );

    let http_task = settings.http_addr.map(|addr| {
        let state = AppState {
            registry: coordinator.registry(),
            health: health.clone(),
            api_key: settings.http_api_key.as_deref().map(Into::into),
        };
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(addr, state, cancel).await {
                error!(addr = %addr, error = %e, "status API failed");
            }
        })
    });

    wait_for_signal().await;
    info!("shutdown signal received, stopping monitors");
    cancel.cancel();

    coordinator.wait(settings.shutdown_timeout).await;
    queue.shutdown(settings.shutdown_timeout).await;
    if let Some(handle) = http_task {
        let _ = handle.await;
    }

    info!("VM watchdog stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
