//! Error taxonomy for the collection pipeline.
//!
//! Errors are a small closed set of tagged variants carrying the device id
//! and cause, checked structurally rather than by string comparison.
//! Batch-level failures (`CollectError`) abort a cycle; device-level
//! failures (`AccountingError`) are recorded on the device's record and
//! never stop the rest of the batch.

use thiserror::Error;

use crate::{source::SourceError, store::StoreError};

/// Cycle-level errors returned by the collection coordinator.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The cycle's cancellation token was already cancelled, or
    /// cancellation was observed mid-cycle. Caller error or shutdown; no
    /// result is produced.
    #[error("collection cancelled")]
    Cancelled,

    /// A required dependency was not supplied at construction time.
    /// Programmer-error class, caught at wiring time before any
    /// collection attempt.
    #[error("missing dependency: {component}")]
    MissingDependency { component: &'static str },

    /// The device snapshot source call itself failed. Batch-level: the
    /// whole cycle is aborted since there is nothing to account for.
    #[error("device source collection failed")]
    Source {
        #[source]
        source: SourceError,
    },
}

/// Device-level errors from the energy accounting engine.
///
/// Store I/O failures propagate to the caller per device; they never abort
/// the cycle. The in-memory total is not advanced on failure.
#[derive(Debug, Error)]
pub enum AccountingError {
    /// The cycle's cancellation token fired while the calculation was
    /// suspended on the store or the device lock. The total is not
    /// advanced.
    #[error("energy accounting cancelled")]
    Cancelled,

    /// Reading the persisted baseline sample failed.
    #[error("failed to read persisted sample for device '{device_id}'")]
    StoreRead {
        device_id: String,
        #[source]
        source: StoreError,
    },

    /// Persisting the new sample failed; the previous baseline remains
    /// authoritative.
    #[error("failed to write persisted sample for device '{device_id}'")]
    StoreWrite {
        device_id: String,
        #[source]
        source: StoreError,
    },
}
