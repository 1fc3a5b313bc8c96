//! Result publisher boundary.
//!
//! The metrics consumer (exposition layer, message bus, whatever sits
//! downstream) receives each cycle's aggregated result through this trait.
//! The pipeline itself only logs; republishing in another format is the
//! consumer's concern.

use tracing::{debug, info};

use super::types::CollectionResult;

/// Trait for consumers of per-cycle collection results.
#[async_trait::async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Hands one cycle's aggregated result to the consumer.
    async fn publish(
        &self,
        result: &CollectionResult,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Publisher that logs a per-cycle summary. The default consumer when no
/// downstream system is wired.
pub struct LogPublisher;

#[async_trait::async_trait]
impl ResultPublisher for LogPublisher {
    async fn publish(
        &self,
        result: &CollectionResult,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            success = result.success,
            devices = result.device_count,
            calculated = result.calculated_count(),
            duration_ms = result.duration_ms,
            "Collection cycle result"
        );

        for (device_id, device) in &result.devices {
            debug!(
                device_id = %device_id,
                connected = device.connected,
                watts = device.active_power_watts,
                energy_calculated = device.energy_calculated,
                energy_wh = device.energy_value_wh,
                error = device.error.as_deref().unwrap_or(""),
                "Device telemetry"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_publisher_accepts_any_result() {
        let publisher = LogPublisher;
        let result = CollectionResult::batch_failure(0, 0, "vendor down".to_string());

        publisher.publish(&result).await.unwrap();
    }
}
