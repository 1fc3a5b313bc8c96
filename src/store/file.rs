//! JSON-file-backed state store.
//!
//! The whole per-device map is kept in memory and rewritten to disk on
//! every write through a temp-file-plus-rename, so a crash mid-write never
//! leaves a torn document. The file is loaded once at open; the in-memory
//! map is authoritative afterwards.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{StateStore, StoreError};
use crate::core::{clock::Clock, types::PersistedSample};

pub struct FileStore {
    path: PathBuf,
    samples: Mutex<HashMap<String, PersistedSample>>,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Opens the store, loading any existing state document.
    ///
    /// A missing file is not an error; it means a fresh fleet with no
    /// recorded baselines yet.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let samples = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let samples: HashMap<String, PersistedSample> = serde_json::from_str(&content)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                info!(
                    path = %path.display(),
                    devices = samples.len(),
                    "Loaded persisted energy state"
                );
                samples
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No existing state file, starting fresh");
                HashMap::new()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_string_lossy().to_string(),
                    source,
                })
            }
        };

        Ok(Self {
            path,
            samples: Mutex::new(samples),
            clock,
        })
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.to_string_lossy().to_string(),
            source,
        }
    }

    /// Serializes the full map and replaces the state file atomically.
    async fn flush(&self, samples: &HashMap<String, PersistedSample>) -> Result<(), StoreError> {
        let document = serde_json::to_string_pretty(samples)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp_path, document)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn read(&self, device_id: &str) -> Result<PersistedSample, StoreError> {
        let samples = self.samples.lock().await;
        Ok(samples
            .get(device_id)
            .copied()
            .unwrap_or_else(|| PersistedSample::bootstrap(self.clock.now_millis())))
    }

    async fn write(&self, device_id: &str, sample: PersistedSample) -> Result<(), StoreError> {
        let mut samples = self.samples.lock().await;
        samples.insert(device_id.to_string(), sample);
        self.flush(&samples).await
    }
}
