//! Device snapshot source boundary.
//!
//! Vendor authentication, session management, and wire-format parsing live
//! behind the `DeviceSource` trait. The pipeline only consumes a "fetch
//! all current device snapshots" capability plus two cheap status probes.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::types::DeviceSnapshot;

pub mod sim;

pub use sim::SimulatedFleet;

/// Errors produced by device source implementations. Opaque to the
/// coordinator, which wraps them as a batch-level failure.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network or transport failure while reaching the vendor endpoint.
    #[error("vendor transport error: {0}")]
    Transport(String),

    /// Vendor session or authentication failure.
    #[error("vendor session error: {0}")]
    Session(String),

    /// The vendor response could not be decoded.
    #[error("vendor response decode error: {0}")]
    Decode(String),

    /// The collection was cancelled before completing.
    #[error("source collection cancelled")]
    Cancelled,
}

/// A fleet-wide snapshot provider.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Returns the current snapshot for every reachable device.
    ///
    /// Implementations must observe the cancellation token so an in-flight
    /// poll can be aborted promptly during shutdown.
    async fn collect_device_data(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<DeviceSnapshot>, SourceError>;

    /// Whether the source currently considers itself connected to the
    /// vendor backend.
    fn connection_status(&self) -> bool;

    /// Timestamp (ms since epoch) of the last successful collection, if any.
    fn last_collection_time(&self) -> Option<i64>;
}
