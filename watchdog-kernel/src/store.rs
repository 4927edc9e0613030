//! Persisted resource list (`vms.yaml`).
//!
//! Read once at startup, rewritten in full on every flush.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmRecord {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VmsFile {
    #[serde(default)]
    vms: Vec<VmRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn load(&self) -> Result<Vec<VmRecord>, StoreError>;
    async fn save(&self, records: &[VmRecord]) -> Result<(), StoreError>;
}

pub struct YamlStore {
    path: PathBuf,
}

impl YamlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.clone(), source }
    }

    fn yaml_err(&self, source: serde_yaml::Error) -> StoreError {
        StoreError::Yaml { path: self.path.clone(), source }
    }
}

#[async_trait]
impl ResourceStore for YamlStore {
    async fn load(&self) -> Result<Vec<VmRecord>, StoreError> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "no VM list found, starting with an empty fleet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: VmsFile = serde_yaml::from_str(&txt).map_err(|e| self.yaml_err(e))?;
        Ok(file.vms)
    }

    /// Écriture dans un fichier temporaire voisin puis `rename`.
    async fn save(&self, records: &[VmRecord]) -> Result<(), StoreError> {
        let out = serde_yaml::to_string(&VmsFile { vms: records.to_vec() }).map_err(|e| self.yaml_err(e))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, out).await.map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io_err(e))?;
        Ok(())
    }
}
