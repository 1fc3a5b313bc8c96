//! Configuration structures for collection scheduling, energy accounting,
//! state persistence, and the device snapshot source.
//!
//! These types control how often the device fleet is polled, how power
//! samples are integrated into cumulative watt-hours, and where the
//! per-device integration baselines are persisted.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Scheduling configuration for the collection cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CollectionConfig {
    /// Interval (in seconds) between collection cycles.
    ///
    /// Must be at least 1 second. A cycle still in flight when the next
    /// tick would fire is never overlapped; the tick is deferred.
    #[validate(range(min = 1, message = "Collection interval must be at least 1 second"))]
    pub interval_secs: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// Policy applied when the elapsed time between two samples of the same
/// device exceeds the configured plausibility bound.
///
/// Such gaps typically mean the agent was down or the device was
/// unreachable; crediting the full window would fabricate energy that was
/// never observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// The interval contributes zero energy; only the baseline timestamp
    /// advances.
    Discard,
    /// The interval contributes as if exactly `max_interval_secs` had
    /// elapsed.
    Cap,
}

impl Default for GapPolicy {
    fn default() -> Self {
        GapPolicy::Discard
    }
}

/// Energy accounting configuration.
///
/// Loaded once at startup and shared read-only by all device calculations.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AccountingConfig {
    /// Rounding unit for cumulative totals, in watt-hours (e.g. 0.01).
    #[validate(custom(function = "validate_precision"))]
    pub precision_wh: f64,

    /// Whether negative instantaneous power is accepted. Devices feeding
    /// power back into the grid can legitimately report negative watts;
    /// for plain UPS/PDU fleets a negative reading is treated as corrupt
    /// and contributes zero.
    pub allow_negative_power: bool,

    /// Maximum plausible elapsed time between two samples, in seconds.
    /// Longer intervals are handled per `gap_policy`.
    #[validate(range(min = 1, message = "Max interval must be at least 1 second"))]
    pub max_interval_secs: u64,

    /// How out-of-bound intervals contribute to the cumulative total.
    pub gap_policy: GapPolicy,

    /// Whether the accounting engine keeps running counters (samples
    /// processed, gaps discarded/capped, negative readings zeroed).
    pub keep_statistics: bool,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            precision_wh: 0.01,
            allow_negative_power: false,
            max_interval_secs: 3600,
            gap_policy: GapPolicy::default(),
            keep_statistics: true,
        }
    }
}

/// Validates that the rounding unit is a positive, finite number.
fn validate_precision(precision: f64) -> Result<(), ValidationError> {
    if precision.is_finite() && precision > 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_precision");
        err.message = Some(format!("Precision must be positive and finite, got {}", precision).into());
        Err(err)
    }
}

/// Available persistent state store backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-memory store; totals reset on restart. Intended for development.
    Memory,
    /// JSON-file-backed store; totals survive restarts.
    File,
}

/// Persistent state store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StoreConfig {
    /// Which store backend to use.
    pub backend: StoreBackend,

    /// Path of the state file (file backend only). Must be non-empty.
    #[validate(length(min = 1, message = "Store path must not be empty"))]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: "/var/lib/wattline/state.json".to_string(),
        }
    }
}

/// Device snapshot source configuration.
///
/// The simulated fleet stands in for a vendor adapter; its parameters
/// control fleet size and the nominal load reported per device.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    /// Number of simulated devices in the fleet.
    #[validate(range(min = 1, message = "At least one device must be configured"))]
    pub device_count: usize,

    /// Nominal active power per device, in watts.
    #[validate(custom(function = "validate_base_power"))]
    pub base_power_watts: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device_count: 3,
            base_power_watts: 450.0,
        }
    }
}

/// Validates that the nominal power is a finite number.
fn validate_base_power(watts: f64) -> Result<(), ValidationError> {
    if watts.is_finite() {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_base_power");
        err.message = Some("Base power must be finite".into());
        Err(err)
    }
}
