//! Persistent state store boundary.
//!
//! The accounting engine only consumes a per-device get/set-last-sample
//! capability. On-disk format, durability knobs, and file layout are the
//! backend's concern, behind the `StateStore` trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::PersistedSample;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors produced by state store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O failed for the given path.
    #[error("state store io error at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The stored document could not be encoded or decoded.
    #[error("state store serialization error: {0}")]
    Serialization(String),

    /// The backend is not in a usable state.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Per-device last-sample persistence.
///
/// Implementations must serialize writes so that each device's record is
/// replaced atomically; the accounting engine additionally serializes
/// read-modify-write per device id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the last recorded sample for the device.
    ///
    /// For a device id that has never been written, implementations MUST
    /// return a synthesized zero-energy sample stamped with the current
    /// time instead of erroring. This seeds the integration window rather
    /// than producing a false first interval of unbounded length.
    async fn read(&self, device_id: &str) -> Result<PersistedSample, StoreError>;

    /// Records the new last sample for the device, replacing any previous
    /// record.
    async fn write(&self, device_id: &str, sample: PersistedSample) -> Result<(), StoreError>;
}
