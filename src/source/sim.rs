//! Deterministic simulated device fleet.
//!
//! Stands in for a vendor adapter so the agent can run end to end without
//! vendor credentials. Each poll reports the configured nominal load with
//! a small deterministic ripple derived from the poll counter, which makes
//! charted energy totals visibly advance without a random source.

use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DeviceSource, SourceError};
use crate::{
    config::collection::SourceConfig,
    core::{
        clock::Clock,
        types::{DeviceReadings, DeviceSnapshot},
    },
};

struct FleetDevice {
    id: String,
    name: String,
    device_type: String,
    model: String,
    base_power_watts: f64,
}

pub struct SimulatedFleet {
    devices: Vec<FleetDevice>,
    clock: Arc<dyn Clock>,
    polls: AtomicU64,
    // 0 means "never collected"; real epochs are far from 0.
    last_collection_ms: AtomicI64,
}

impl SimulatedFleet {
    pub fn from_config(config: &SourceConfig, clock: Arc<dyn Clock>) -> Self {
        let devices = (1..=config.device_count)
            .map(|n| FleetDevice {
                id: format!("ups-{}", n),
                name: format!("Rack UPS {}", n),
                device_type: "ups".to_string(),
                model: "SimGuard 1500".to_string(),
                // Spread nominal loads so devices are distinguishable.
                base_power_watts: config.base_power_watts + (n as f64 - 1.0) * 25.0,
            })
            .collect();

        Self {
            devices,
            clock,
            polls: AtomicU64::new(0),
            last_collection_ms: AtomicI64::new(0),
        }
    }

    /// Ripple of up to ±4% of nominal, cycling with the poll counter.
    fn ripple(&self, poll: u64, device_index: usize, base: f64) -> f64 {
        let phase = (poll as usize + device_index) % 9;
        (phase as f64 - 4.0) * base * 0.01
    }
}

#[async_trait]
impl DeviceSource for SimulatedFleet {
    async fn collect_device_data(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<DeviceSnapshot>, SourceError> {
        if token.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let poll = self.polls.fetch_add(1, Ordering::SeqCst);

        let snapshots = self
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| {
                let watts = device.base_power_watts + self.ripple(poll, i, device.base_power_watts);
                DeviceSnapshot {
                    id: device.id.clone(),
                    name: device.name.clone(),
                    device_type: device.device_type.clone(),
                    model: device.model.clone(),
                    connected: true,
                    active_power_watts: watts,
                    readings: DeviceReadings {
                        input_voltage: Some(230.0),
                        output_voltage: Some(229.6),
                        load_percent: Some((watts / 1500.0) * 100.0),
                        battery_charge_percent: Some(100.0),
                        battery_runtime_secs: Some(5400),
                        status: "OL".to_string(),
                    },
                }
            })
            .collect();

        self.last_collection_ms
            .store(self.clock.now_millis(), Ordering::SeqCst);

        Ok(snapshots)
    }

    fn connection_status(&self) -> bool {
        true
    }

    fn last_collection_time(&self) -> Option<i64> {
        let ms = self.last_collection_ms.load(Ordering::SeqCst);
        (ms != 0).then_some(ms)
    }
}
