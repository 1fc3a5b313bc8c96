//! In-memory state store.
//!
//! Totals reset when the process exits; intended for development and as
//! the test double for the accounting engine.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StateStore, StoreError};
use crate::core::{clock::Clock, types::PersistedSample};

pub struct MemoryStore {
    samples: RwLock<HashMap<String, PersistedSample>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of devices with a recorded sample.
    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, device_id: &str) -> Result<PersistedSample, StoreError> {
        let samples = self.samples.read().await;
        Ok(samples
            .get(device_id)
            .copied()
            .unwrap_or_else(|| PersistedSample::bootstrap(self.clock.now_millis())))
    }

    async fn write(&self, device_id: &str, sample: PersistedSample) -> Result<(), StoreError> {
        self.samples
            .write()
            .await
            .insert(device_id.to_string(), sample);
        Ok(())
    }
}
