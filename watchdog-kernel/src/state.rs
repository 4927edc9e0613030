/**
 * REGISTRY - État partagé de la flotte
 *
 * RÔLE :
 * Liste des VMs surveillées sous un unique verrou : adresse IP (seul champ
 * touché par plusieurs tâches), statut courant et horodatages exposés à l'API.
 *
 * RÈGLES :
 * - Chaque entrée n'est écrite que par son monitor (sauf lecture du snapshot)
 * - Statut et date de changement sont écrits ensemble sous le verrou
 * - Le verrou n'est jamais tenu pendant un appel réseau ou une écriture disque
 */

use crate::status::VmStatus;
use crate::store::VmRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
struct Entry {
    record: VmRecord,
    status: VmStatus,
    status_since: OffsetDateTime,
    last_api_check: Option<OffsetDateTime>,
}

/// Vue publique d'une VM (API HTTP, logs).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VmView {
    pub name: String,
    pub url: String,
    pub ip: Option<String>,
    pub status: VmStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub status_since: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_api_check: Option<OffsetDateTime>,
}

pub struct Registry {
    entries: Mutex<Vec<Entry>>,
}

pub type SharedRegistry = Arc<Registry>;

impl Registry {
    pub fn new(records: Vec<VmRecord>) -> SharedRegistry {
        let now = OffsetDateTime::now_utc();
        let entries = records
            .into_iter()
            .map(|record| Entry {
                record,
                status: VmStatus::Unknown,
                status_since: now,
                last_api_check: None,
            })
            .collect();
        Arc::new(Self { entries: Mutex::new(entries) })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ip(&self, idx: usize) -> Option<String> {
        self.entries.lock().get(idx).and_then(|e| e.record.ip.clone())
    }

    /// Remplace l'adresse ; retourne l'ancienne si elle a changé, `None` sinon.
    pub fn set_ip(&self, idx: usize, ip: &str) -> Option<Option<String>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(idx)?;
        if entry.record.ip.as_deref() == Some(ip) {
            return None;
        }
        Some(entry.record.ip.replace(ip.to_string()))
    }

    pub fn set_status(&self, idx: usize, status: VmStatus) {
        if let Some(entry) = self.entries.lock().get_mut(idx) {
            entry.status = status;
            entry.status_since = OffsetDateTime::now_utc();
        }
    }

    pub fn mark_api_check(&self, idx: usize) {
        if let Some(entry) = self.entries.lock().get_mut(idx) {
            entry.last_api_check = Some(OffsetDateTime::now_utc());
        }
    }

    /// Copie des enregistrements à persister.
    pub fn records(&self) -> Vec<VmRecord> {
        self.entries.lock().iter().map(|e| e.record.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<VmView> {
        self.entries
            .lock()
            .iter()
            .map(|e| VmView {
                name: e.record.name.clone(),
                url: e.record.url.clone(),
                ip: e.record.ip.clone(),
                status: e.status,
                status_since: e.status_since,
                last_api_check: e.last_api_check,
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<VmView> {
        self.snapshot().into_iter().find(|v| v.name == name)
    }
}
