//! Shared data types flowing through the collection pipeline.
//!
//! A `DeviceSnapshot` is one poll's worth of raw readings for one device.
//! The coordinator enriches each snapshot into a `DeviceCollectionInfo`
//! carrying the accounting outcome, and aggregates one `CollectionResult`
//! per cycle. The `PersistedSample` is the durable integration baseline
//! kept per device in the state store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Electrical, battery, and status readings reported by a device in one poll.
///
/// Optional fields are readings a given device class may not expose
/// (a PDU has no battery, a contact-closure UPS reports no voltages).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceReadings {
    /// Input (utility) voltage in volts.
    pub input_voltage: Option<f64>,

    /// Output voltage in volts.
    pub output_voltage: Option<f64>,

    /// Output load as a percentage of rated capacity.
    pub load_percent: Option<f64>,

    /// Battery state of charge as a percentage.
    pub battery_charge_percent: Option<f64>,

    /// Estimated battery runtime remaining, in seconds.
    pub battery_runtime_secs: Option<u64>,

    /// Raw device status string as reported by the vendor (e.g. "OL", "OB").
    pub status: String,
}

/// One poll's worth of raw per-device readings from the vendor source.
///
/// Produced once per collection cycle, immutable, and not retained beyond
/// the cycle that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Stable device identifier, unique across the fleet.
    pub id: String,

    /// Human-readable display name.
    pub name: String,

    /// Vendor type code (e.g. "ups", "pdu").
    pub device_type: String,

    /// Vendor model designation.
    pub model: String,

    /// Whether the device was reachable when the snapshot was taken.
    pub connected: bool,

    /// The designated active power reading in watts. This is the sole
    /// input to energy accounting.
    pub active_power_watts: f64,

    /// The remaining readings bundle, carried through for telemetry.
    pub readings: DeviceReadings,
}

/// The coordinator's per-device record for one cycle: every snapshot field
/// plus the accounting outcome.
///
/// Created fresh every cycle, owned exclusively by the `CollectionResult`
/// that contains it, and never mutated after the cycle returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCollectionInfo {
    pub id: String,
    pub name: String,
    pub device_type: String,
    pub model: String,
    pub connected: bool,
    pub active_power_watts: f64,
    pub readings: DeviceReadings,

    /// Whether energy accounting succeeded for this device this cycle.
    pub energy_calculated: bool,

    /// Cumulative energy total in watt-hours, valid when
    /// `energy_calculated` is true.
    pub energy_value_wh: f64,

    /// Per-device error message when accounting or conversion failed.
    pub error: Option<String>,
}

impl DeviceCollectionInfo {
    /// Builds the pre-accounting record from a raw snapshot.
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            device_type: snapshot.device_type.clone(),
            model: snapshot.model.clone(),
            connected: snapshot.connected,
            active_power_watts: snapshot.active_power_watts,
            readings: snapshot.readings.clone(),
            energy_calculated: false,
            energy_value_wh: 0.0,
            error: None,
        }
    }
}

/// Aggregated outcome of one collection cycle.
///
/// When the source call itself failed the device map is empty and
/// `success` is false; otherwise `success` is true even if individual
/// devices failed energy accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResult {
    /// Batch-level success flag. Independent of per-device outcomes.
    pub success: bool,

    /// Number of devices in this cycle.
    pub device_count: usize,

    /// Per-device records, keyed by device id. No ordering guarantee.
    pub devices: HashMap<String, DeviceCollectionInfo>,

    /// Collection timestamp, milliseconds since the Unix epoch.
    pub collected_at_ms: i64,

    /// Wall-clock duration of the cycle in milliseconds.
    pub duration_ms: u64,

    /// Top-level error message for batch-level failures.
    pub error: Option<String>,
}

impl CollectionResult {
    /// Builds the result for a cycle whose source call failed: no devices,
    /// `success = false`, and the wrapped error message.
    pub fn batch_failure(collected_at_ms: i64, duration_ms: u64, error: String) -> Self {
        Self {
            success: false,
            device_count: 0,
            devices: HashMap::new(),
            collected_at_ms,
            duration_ms,
            error: Some(error),
        }
    }

    /// Number of devices whose energy accounting succeeded this cycle.
    pub fn calculated_count(&self) -> usize {
        self.devices
            .values()
            .filter(|info| info.energy_calculated)
            .count()
    }

    /// Number of devices whose energy accounting failed this cycle.
    pub fn failed_count(&self) -> usize {
        self.device_count - self.calculated_count()
    }
}

/// Durable last-known sample for one device: the integration baseline for
/// the next calculation.
///
/// Created on the first successful calculation for a device, overwritten
/// on every subsequent success, never deleted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedSample {
    /// Timestamp of the last sample, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,

    /// Cumulative energy total at that timestamp, in watt-hours.
    pub energy_wh: f64,
}

impl PersistedSample {
    /// Synthesized zero-energy record for a device that has never been
    /// seen. Stamped with the current time so the first integration window
    /// is effectively zero rather than unbounded.
    pub fn bootstrap(now_ms: i64) -> Self {
        Self {
            timestamp_ms: now_ms,
            energy_wh: 0.0,
        }
    }
}
