//! Collection coordinator.
//!
//! Pulls one snapshot batch from the device source, converts vendor
//! records into per-device collection records, runs energy accounting for
//! each device, and aggregates one `CollectionResult` per cycle.
//!
//! Failure isolation is the core invariant here: a batch-level source
//! failure aborts the cycle (there is nothing to account for), but one
//! device's accounting failure is recorded on that device's record and
//! never stops processing of the remaining devices.

use std::{collections::HashMap, sync::Arc};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    accounting::EnergyAccountant,
    clock::{Clock, SystemClock},
    error::{AccountingError, CollectError},
    types::{CollectionResult, DeviceCollectionInfo, DeviceSnapshot},
};
use crate::source::{DeviceSource, SourceError};

/// Builder for `Coordinator`. Dependencies are validated at `build()`
/// time so a missing source or accountant fails at wiring, before any
/// collection attempt.
#[derive(Default)]
pub struct CoordinatorBuilder {
    source: Option<Arc<dyn DeviceSource>>,
    accountant: Option<Arc<EnergyAccountant>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoordinatorBuilder {
    pub fn source(mut self, source: Arc<dyn DeviceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn accountant(mut self, accountant: Arc<EnergyAccountant>) -> Self {
        self.accountant = Some(accountant);
        self
    }

    /// Overrides the system clock; used by tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Returns `CollectError::MissingDependency` if the device source or
    /// the accounting engine was not supplied.
    pub fn build(self) -> Result<Coordinator, CollectError> {
        let source = self.source.ok_or(CollectError::MissingDependency {
            component: "device source",
        })?;
        let accountant = self.accountant.ok_or(CollectError::MissingDependency {
            component: "accounting engine",
        })?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(Coordinator {
            source,
            accountant,
            clock,
        })
    }
}

/// Stateless-per-call collection coordinator. Safe to call concurrently
/// with the scheduler's own invocations; per-device store access is
/// serialized inside the accounting engine.
pub struct Coordinator {
    source: Arc<dyn DeviceSource>,
    accountant: Arc<EnergyAccountant>,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Runs one collection cycle: poll the fleet, account every device,
    /// aggregate the result.
    ///
    /// # Errors
    ///
    /// * `CollectError::Cancelled` — the token was cancelled before or
    ///   during the cycle; no result is produced.
    /// * `CollectError::Source` — the snapshot source call failed; the
    ///   whole cycle is aborted with no per-device processing.
    pub async fn collect_device_data(
        &self,
        token: &CancellationToken,
    ) -> Result<CollectionResult, CollectError> {
        if token.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        let started = Instant::now();
        let collected_at_ms = self.clock.now_millis();

        let snapshots = self
            .source
            .collect_device_data(token)
            .await
            .map_err(|source| match source {
                SourceError::Cancelled => CollectError::Cancelled,
                source => CollectError::Source { source },
            })?;

        debug!(devices = snapshots.len(), "Snapshot batch received");

        let mut devices = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            if token.is_cancelled() {
                return Err(CollectError::Cancelled);
            }

            let info = self.process_device(snapshot, token).await?;
            devices.insert(info.id.clone(), info);
        }

        Ok(CollectionResult {
            success: true,
            device_count: devices.len(),
            devices,
            collected_at_ms,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        })
    }

    /// Converts one snapshot and runs accounting for it. Device failures
    /// are recorded on the returned record; only cancellation propagates,
    /// aborting the cycle.
    async fn process_device(
        &self,
        snapshot: DeviceSnapshot,
        token: &CancellationToken,
    ) -> Result<DeviceCollectionInfo, CollectError> {
        let mut info = DeviceCollectionInfo::from_snapshot(&snapshot);

        // Conversion check: a non-finite power reading cannot be
        // integrated and is isolated like any other device failure.
        if !snapshot.active_power_watts.is_finite() {
            warn!(
                device_id = %snapshot.id,
                watts = snapshot.active_power_watts,
                "Active power reading is not finite; skipping energy accounting"
            );
            info.error = Some(format!(
                "invalid active power reading: {}",
                snapshot.active_power_watts
            ));
            return Ok(info);
        }

        match self
            .accountant
            .calculate(&snapshot.id, snapshot.active_power_watts, token)
            .await
        {
            Ok(total_wh) => {
                info.energy_calculated = true;
                info.energy_value_wh = total_wh;
            }
            Err(AccountingError::Cancelled) => return Err(CollectError::Cancelled),
            Err(e) => {
                warn!(
                    device_id = %snapshot.id,
                    error = %e,
                    "Energy accounting failed; continuing with remaining devices"
                );
                info.error = Some(e.to_string());
            }
        }

        Ok(info)
    }
}
