//! Scénario complet : VM arrêtée → démarrage → grâce → rétablissement,
//! alertes livrées et IP persistée dans le fichier YAML.

use devkit::{wait_until, FakeGateway, FakeTelegram};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vm_watchdog::cloud::HttpControlApi;
use vm_watchdog::coordinator::Coordinator;
use vm_watchdog::health::HealthTracker;
use vm_watchdog::monitor::{MonitorDeps, MonitorSettings};
use vm_watchdog::notify::{NotificationQueue, QueueSettings, TelegramNotifier};
use vm_watchdog::probe::{ProbePolicy, TcpProber};
use vm_watchdog::retry::BackoffPolicy;
use vm_watchdog::status::VmStatus;
use vm_watchdog::store::{ResourceStore, VmRecord, YamlStore};

#[tokio::test]
async fn test_stopped_vm_is_restarted_and_reported() {
    // "port SSH" local : le probe TCP réussit dès que la VM a une IP
    let ssh = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let probe_port = ssh.local_addr().unwrap().port();

    let gw = FakeGateway::start().await.unwrap();
    gw.add_vm("web", "STOPPED", Some("127.0.0.1"));
    let chat = FakeTelegram::start().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vms.yaml");
    let store = Arc::new(YamlStore::new(&path));
    store
        .save(&[VmRecord { name: "web".into(), url: gw.base_url("web"), ip: None }])
        .await
        .unwrap();
    let records = store.load().await.unwrap();

    let health = HealthTracker::new();
    let notifier = Arc::new(TelegramNotifier::new(chat.api_url(), "123:abc", -100, None).unwrap());
    let queue = Arc::new(NotificationQueue::start(notifier, QueueSettings::default(), health.clone()));
    let deps = MonitorDeps {
        api: Arc::new(HttpControlApi::new(50).unwrap()),
        prober: Arc::new(TcpProber::new(
            probe_port,
            ProbePolicy { attempts: 1, attempt_timeout: Duration::from_millis(500), ..ProbePolicy::default() },
        )),
        alerts: queue.clone(),
        health: health.clone(),
    };
    let settings = MonitorSettings {
        min_interval: Duration::from_millis(50),
        max_interval: Duration::from_millis(200),
        grace_period: Duration::from_millis(300),
        backoff: BackoffPolicy::default(),
    };

    let cancel = CancellationToken::new();
    let coordinator = Coordinator::start(records, store.clone(), deps, settings, Duration::from_millis(100), cancel.clone());
    let registry = coordinator.registry();

    assert!(
        wait_until(Duration::from_secs(5), || chat.messages().len() >= 3).await,
        "got {:?}",
        chat.texts()
    );
    assert_eq!(registry.find("web").unwrap().status, VmStatus::Running);
    assert_eq!(gw.start_calls("web"), 1);

    // plusieurs workers : l'ordre de livraison n'est pas garanti
    let texts = chat.texts();
    for expected in ["FAILURE", "Auto-start", "RECOVERY"] {
        assert!(texts.iter().any(|t| t.contains(expected) && t.contains("*web*")), "{texts:?}");
    }

    // VM saine : les ticks suivants passent par le probe, sans nouvelle alerte
    let infos = gw.info_calls("web");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(chat.messages().len(), 3);
    assert_eq!(gw.info_calls("web"), infos);

    cancel.cancel();
    assert!(coordinator.wait(Duration::from_secs(2)).await);
    queue.shutdown(Duration::from_secs(2)).await;

    let saved = YamlStore::new(&path).load().await.unwrap();
    assert_eq!(saved[0].ip.as_deref(), Some("127.0.0.1"));
    let h = health.get_health(1);
    assert_eq!(h.remediations, 1);
    assert_eq!(h.notifications_sent, 3);
    drop(ssh);
}
