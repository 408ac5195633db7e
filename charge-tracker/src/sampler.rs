//! The sampling loop: one reading per tick, bounded by a total run budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::TrackerConfig;
use crate::error::TrackerResult;
use crate::sample::SampleId;
use crate::scheduler::cancelled;
use crate::source::SampleSource;
use crate::store::SampleStore;

/// Lifecycle of a sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopped,
}

/// Why a sampling run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The maximum run duration elapsed.
    BudgetExhausted,
    /// An external stop signal arrived.
    Cancelled,
}

/// Summary of a finished sampling run.
#[derive(Debug, Clone)]
pub struct SamplerReport {
    pub inserted: u64,
    pub failed_ticks: u64,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

/// Reads the source on a fixed interval and appends each reading to the store.
pub struct Sampler {
    store: Arc<SampleStore>,
    source: Arc<dyn SampleSource>,
    producer_id: String,
    tick_interval: Duration,
    max_run_duration: Duration,
    state: watch::Sender<SamplerState>,
}

impl Sampler {
    pub fn new(
        config: &TrackerConfig,
        store: Arc<SampleStore>,
        source: Arc<dyn SampleSource>,
        producer_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SamplerState::Idle);
        Self {
            store,
            source,
            producer_id: producer_id.into(),
            tick_interval: config.tick_interval(),
            max_run_duration: config.max_run_duration(),
            state,
        }
    }

    /// Observe state transitions of this sampler.
    pub fn subscribe(&self) -> watch::Receiver<SamplerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SamplerState {
        *self.state.borrow()
    }

    /// Run until the budget is spent or `shutdown` flips to `true`.
    ///
    /// Failed ticks are logged and skipped; the missed sample is not retried.
    #[instrument(skip_all, fields(producer_id = %self.producer_id))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SamplerReport {
        let run_start = Instant::now();
        self.state.send_replace(SamplerState::Running);
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            budget_secs = self.max_run_duration.as_secs(),
            "Sampler started"
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut inserted = 0u64;
        let mut failed_ticks = 0u64;

        let stop_reason = loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break StopReason::Cancelled,
                _ = ticker.tick() => {}
            }

            if run_start.elapsed() >= self.max_run_duration {
                break StopReason::BudgetExhausted;
            }

            match self.sample_once() {
                Ok(id) => {
                    inserted += 1;
                    debug!(id, "Sample stored");
                }
                Err(e) => {
                    failed_ticks += 1;
                    warn!("Skipping sample: {}", e);
                }
            }
        };

        self.state.send_replace(SamplerState::Stopped);
        let elapsed = run_start.elapsed();
        match stop_reason {
            StopReason::BudgetExhausted => info!(
                inserted,
                failed_ticks, "Maximum run duration reached, sampler stopped"
            ),
            StopReason::Cancelled => info!(inserted, failed_ticks, "Sampler stopped"),
        }

        SamplerReport {
            inserted,
            failed_ticks,
            stop_reason,
            elapsed,
        }
    }

    fn sample_once(&self) -> TrackerResult<SampleId> {
        let value = self.source.read()?;
        let timestamp = Utc::now().timestamp_millis();
        self.store.insert(&self.producer_id, timestamp, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::source::FixedSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        calls: AtomicU32,
    }

    impl SampleSource for FlakySource {
        fn read(&self) -> TrackerResult<i64> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                Err(TrackerError::SourceUnavailable {
                    message: "permission revoked".to_string(),
                })
            } else {
                Ok(50)
            }
        }
    }

    fn config(tick_ms: u64, budget_ms: u64) -> TrackerConfig {
        TrackerConfig::new()
            .with_tick_interval(Duration::from_millis(tick_ms))
            .with_max_run_duration(Duration::from_millis(budget_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_sampler() {
        let store = Arc::new(SampleStore::in_memory().unwrap());
        let sampler = Sampler::new(
            &config(1000, 3000),
            store.clone(),
            Arc::new(FixedSource::new(80)),
            "device-1",
        );
        let state = sampler.subscribe();
        assert_eq!(sampler.state(), SamplerState::Idle);

        let (_tx, rx) = watch::channel(false);
        let report = sampler.run(rx).await;

        assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(report.inserted, 3);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(*state.borrow(), SamplerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_do_not_stop_loop() {
        let store = Arc::new(SampleStore::in_memory().unwrap());
        let sampler = Sampler::new(
            &config(1000, 4000),
            store.clone(),
            Arc::new(FlakySource {
                calls: AtomicU32::new(0),
            }),
            "device-1",
        );

        let (_tx, rx) = watch::channel(false);
        let report = sampler.run(rx).await;

        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed_ticks, 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_stop() {
        let store = Arc::new(SampleStore::in_memory().unwrap());
        let sampler = Sampler::new(
            &config(1000, 3_600_000),
            store.clone(),
            Arc::new(FixedSource::new(80)),
            "device-1",
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sampler.run(rx));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.inserted, 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.count().unwrap(), 3);
    }
}
