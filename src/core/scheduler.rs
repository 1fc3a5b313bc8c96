//! Collection scheduler.
//!
//! Owns the repeating timer that drives collection cycles. One cycle runs
//! per tick; the loop awaits the cycle before sleeping the remainder of
//! the interval, and an explicit busy flag asserts the single-flight
//! invariant even if ticks and external callers ever race. A cycle failure
//! is logged and retried on the next tick — the interval itself throttles
//! retries, so no extra backoff is applied.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    clock::Clock,
    coordinator::Coordinator,
    error::CollectError,
    publisher::ResultPublisher,
    types::CollectionResult,
};

/// Errors from scheduler lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` was called while the collection loop is already running.
    #[error("scheduler is already running")]
    AlreadyRunning,
}

struct LoopState {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Drives collection cycles at a fixed cadence.
///
/// Lifecycle: `Stopped → Running → Stopped`. After `stop` the scheduler
/// can be re-armed with another `start`; no other states exist.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    publisher: Arc<dyn ResultPublisher>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: tokio::sync::Mutex<LoopState>,
    busy: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        publisher: Arc<dyn ResultPublisher>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            publisher,
            clock,
            interval,
            state: tokio::sync::Mutex::new(LoopState {
                token: None,
                handle: None,
            }),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the collection loop. The first cycle runs immediately.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the loop is active.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if state.handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(collection_loop(
            self.coordinator.clone(),
            self.publisher.clone(),
            self.clock.clone(),
            self.interval,
            token.clone(),
            self.busy.clone(),
        ));

        state.token = Some(token);
        state.handle = Some(handle);
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        Ok(())
    }

    /// Signals cancellation and waits for any in-flight cycle to return.
    ///
    /// Calling `stop` before `start`, or twice in a row, is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(token) = state.token.take() else {
            debug!("Stop requested but scheduler is not running");
            return;
        };

        token.cancel();
        if let Some(handle) = state.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Collection loop task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    /// Whether the collection loop is currently armed.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }
}

async fn collection_loop(
    coordinator: Arc<Coordinator>,
    publisher: Arc<dyn ResultPublisher>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    token: CancellationToken,
    busy: Arc<AtomicBool>,
) {
    loop {
        let started = tokio::time::Instant::now();

        // The loop itself never overlaps cycles; the flag additionally
        // guards against a cycle still in flight from a previous arming.
        if busy.swap(true, Ordering::AcqRel) {
            warn!("Previous collection cycle still in flight; skipping this tick");
        } else {
            run_cycle(&coordinator, &publisher, &clock, &token).await;
            busy.store(false, Ordering::Release);
        }

        if token.is_cancelled() {
            break;
        }

        let wait = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(wait) => {}
        }
    }

    debug!("Collection loop exited");
}

/// Runs one cycle and hands the outcome to the publisher. Batch failures
/// are reported as a failed result; they never end the loop.
async fn run_cycle(
    coordinator: &Coordinator,
    publisher: &Arc<dyn ResultPublisher>,
    clock: &Arc<dyn Clock>,
    token: &CancellationToken,
) {
    let result = match coordinator.collect_device_data(token).await {
        Ok(result) => {
            let failed = result.failed_count();
            if failed > 0 {
                warn!(
                    devices = result.device_count,
                    failed, "Collection cycle completed with device failures"
                );
            } else {
                debug!(
                    devices = result.device_count,
                    duration_ms = result.duration_ms,
                    "Collection cycle completed"
                );
            }
            result
        }
        Err(CollectError::Cancelled) => {
            debug!("Collection cycle cancelled");
            return;
        }
        Err(e) => {
            error!(error = %e, "Collection cycle failed; retrying next tick");
            CollectionResult::batch_failure(clock.now_millis(), 0, e.to_string())
        }
    };

    if let Err(e) = publisher.publish(&result).await {
        error!(error = %e, "Failed to publish collection result");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::collection::AccountingConfig,
        core::{
            accounting::EnergyAccountant,
            clock::ManualClock,
            types::{DeviceReadings, DeviceSnapshot},
        },
        source::{DeviceSource, SourceError},
        store::MemoryStore,
    };

    struct RecordingPublisher {
        results: StdMutex<Vec<CollectionResult>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                results: StdMutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.results.lock().unwrap().len()
        }

        fn last(&self) -> Option<CollectionResult> {
            self.results.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ResultPublisher for RecordingPublisher {
        async fn publish(
            &self,
            result: &CollectionResult,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    struct TestSource {
        fail: bool,
    }

    #[async_trait]
    impl DeviceSource for TestSource {
        async fn collect_device_data(
            &self,
            _token: &CancellationToken,
        ) -> Result<Vec<DeviceSnapshot>, SourceError> {
            if self.fail {
                return Err(SourceError::Transport("vendor unreachable".to_string()));
            }
            Ok(vec![DeviceSnapshot {
                id: "ups-1".to_string(),
                name: "Rack UPS 1".to_string(),
                device_type: "ups".to_string(),
                model: "SmartGuard 1500".to_string(),
                connected: true,
                active_power_watts: 600.0,
                readings: DeviceReadings {
                    status: "OL".to_string(),
                    ..Default::default()
                },
            }])
        }

        fn connection_status(&self) -> bool {
            !self.fail
        }

        fn last_collection_time(&self) -> Option<i64> {
            None
        }
    }

    /// Source whose poll blocks until the cycle is cancelled.
    struct BlockedSource;

    #[async_trait]
    impl DeviceSource for BlockedSource {
        async fn collect_device_data(
            &self,
            token: &CancellationToken,
        ) -> Result<Vec<DeviceSnapshot>, SourceError> {
            token.cancelled().await;
            Err(SourceError::Cancelled)
        }

        fn connection_status(&self) -> bool {
            false
        }

        fn last_collection_time(&self) -> Option<i64> {
            None
        }
    }

    fn scheduler_with_source(
        source: Arc<dyn DeviceSource>,
        interval_ms: u64,
    ) -> (Scheduler, Arc<RecordingPublisher>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let accountant = Arc::new(EnergyAccountant::new(
            Arc::new(MemoryStore::new(clock.clone())),
            clock.clone(),
            AccountingConfig::default(),
        ));
        let coordinator = Arc::new(
            Coordinator::builder()
                .source(source)
                .accountant(accountant)
                .clock(clock.clone())
                .build()
                .unwrap(),
        );
        let publisher = Arc::new(RecordingPublisher::new());

        let scheduler = Scheduler::new(
            coordinator,
            publisher.clone(),
            clock,
            Duration::from_millis(interval_ms),
        );
        (scheduler, publisher)
    }

    fn scheduler_with(fail: bool, interval_ms: u64) -> (Scheduler, Arc<RecordingPublisher>) {
        scheduler_with_source(Arc::new(TestSource { fail }), interval_ms)
    }

    #[tokio::test]
    async fn start_runs_cycles_and_publishes_results() {
        let (scheduler, publisher) = scheduler_with(false, 50);

        scheduler.start().await.unwrap();
        sleep(Duration::from_millis(220)).await;
        scheduler.stop().await;

        assert!(publisher.count() >= 2, "expected multiple cycles");
        let result = publisher.last().unwrap();
        assert!(result.success);
        assert_eq!(result.device_count, 1);
        assert!(result.devices["ups-1"].energy_calculated);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let (scheduler, _publisher) = scheduler_with(false, 50);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn stop_twice_is_a_noop() {
        let (scheduler, _publisher) = scheduler_with(false, 50);

        scheduler.start().await.unwrap();
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let (scheduler, _publisher) = scheduler_with(false, 50);

        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn scheduler_can_be_rearmed_after_stop() {
        let (scheduler, publisher) = scheduler_with(false, 50);

        scheduler.start().await.unwrap();
        sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;
        let after_first_run = publisher.count();
        assert!(after_first_run >= 1);

        scheduler.start().await.unwrap();
        sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;

        assert!(publisher.count() > after_first_run);
    }

    #[tokio::test]
    #[traced_test]
    async fn source_failure_keeps_the_loop_running() {
        let (scheduler, publisher) = scheduler_with(true, 50);

        scheduler.start().await.unwrap();
        sleep(Duration::from_millis(220)).await;
        scheduler.stop().await;

        assert!(
            publisher.count() >= 2,
            "failed cycles must be retried on subsequent ticks"
        );
        let result = publisher.last().unwrap();
        assert!(!result.success);
        assert_eq!(result.device_count, 0);
        assert!(result.devices.is_empty());
        assert!(result.error.is_some());
        assert!(logs_contain("Collection cycle failed"));
    }

    #[tokio::test]
    async fn stop_aborts_a_blocked_cycle_promptly() {
        let (scheduler, publisher) = scheduler_with_source(Arc::new(BlockedSource), 50);

        scheduler.start().await.unwrap();
        sleep(Duration::from_millis(30)).await; // first cycle is stuck in the source

        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .expect("stop must not wait out a blocked cycle");

        assert!(!scheduler.is_running().await);
        // The aborted cycle produced no result to publish.
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn stop_waits_for_the_loop_to_exit() {
        let (scheduler, _publisher) = scheduler_with(false, 50);

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }
}
