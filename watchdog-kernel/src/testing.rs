//! Doublures de test partagées par les modules du kernel.

use crate::cloud::{ApiError, ControlApi, StartOutcome, VmInfo};
use crate::notify::{AlertSink, EnqueueOutcome, Notification};
use crate::probe::Prober;
use crate::status::VmStatus;
use crate::store::{ResourceStore, StoreError, VmRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Passerelle de contrôle programmable.
pub struct MockApi {
    info: Mutex<Result<VmInfo, u16>>,
    starts: Mutex<VecDeque<StartOutcome>>,
    hang: AtomicBool,
    pub info_calls: AtomicU32,
    pub start_calls: AtomicU32,
}

impl MockApi {
    pub fn new(status: VmStatus, ip: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(Ok(VmInfo { status, ip: ip.map(Into::into) })),
            starts: Mutex::new(VecDeque::new()),
            hang: AtomicBool::new(false),
            info_calls: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
        })
    }

    pub fn set(&self, status: VmStatus, ip: Option<&str>) {
        *self.info.lock() = Ok(VmInfo { status, ip: ip.map(Into::into) });
    }

    pub fn fail(&self, code: u16) {
        *self.info.lock() = Err(code);
    }

    /// Les appels `info` suivants ne répondent jamais.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn push_start(&self, outcome: StartOutcome) {
        self.starts.lock().push_back(outcome);
    }

    pub fn infos(&self) -> u32 {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlApi for MockApi {
    async fn info(&self, _base_url: &str) -> Result<VmInfo, ApiError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.info
            .lock()
            .clone()
            .map_err(|code| ApiError::Status { code, body: "mock".into() })
    }

    async fn start(&self, _base_url: &str) -> Result<StartOutcome, ApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.starts.lock().pop_front().unwrap_or(StartOutcome::Started))
    }
}

#[derive(Default)]
pub struct MockProber {
    pub reachable: AtomicBool,
    pub calls: AtomicU32,
}

impl MockProber {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn probes(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(&self, _addr: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    items: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl AlertSink for RecordingSink {
    fn enqueue(&self, notification: Notification) -> EnqueueOutcome {
        self.items.lock().push(notification);
        EnqueueOutcome::Queued
    }
}

/// Store en mémoire qui garde chaque sauvegarde.
#[derive(Default)]
pub struct MemoryStore {
    initial: Vec<VmRecord>,
    saves: Mutex<Vec<Vec<VmRecord>>>,
}

impl MemoryStore {
    pub fn with(records: Vec<VmRecord>) -> Arc<Self> {
        Arc::new(Self { initial: records, saves: Mutex::new(Vec::new()) })
    }

    pub fn saves(&self) -> Vec<Vec<VmRecord>> {
        self.saves.lock().clone()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn load(&self) -> Result<Vec<VmRecord>, StoreError> {
        Ok(self.initial.clone())
    }

    async fn save(&self, records: &[VmRecord]) -> Result<(), StoreError> {
        self.saves.lock().push(records.to_vec());
        Ok(())
    }
}

pub fn record(name: &str, ip: Option<&str>) -> VmRecord {
    VmRecord {
        name: name.into(),
        url: format!("https://gw.example/{name}"),
        ip: ip.map(Into::into),
    }
}
