//! Host-facing control surface tying the sampler and the sync engine together.
//!
//! ```text
//! ┌──────────────┐   insert   ┌──────────────┐  unsynced / mark  ┌──────────────┐
//! │   Sampler    │──────────▶│ SampleStore  │◀─────────────────│  SyncEngine  │
//! │ (1s ticks)   │           │   (SQLite)   │                  │ (60s ticks)  │
//! └──────┬───────┘           └──────────────┘                  └──────┬───────┘
//!        │ read                                                       │ append
//!        ▼                                                            ▼
//! ┌──────────────┐                                             ┌──────────────┐
//! │ SampleSource │                                             │  RemoteSink  │
//! └──────────────┘                                             └──────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::TrackerConfig;
use crate::credentials::CredentialProvider;
use crate::error::TrackerResult;
use crate::sampler::{Sampler, SamplerReport, SamplerState};
use crate::scheduler::TaskHandle;
use crate::sink::RemoteSink;
use crate::source::SampleSource;
use crate::store::SampleStore;
use crate::sync::{CycleOutcome, SyncEngine, SyncStats};

/// What the two loops reported when they were stopped.
#[derive(Debug, Clone, Default)]
pub struct TrackerReport {
    pub sampler: Option<SamplerReport>,
    pub sync: Option<SyncStats>,
}

/// Starts and stops the sampling and sync loops.
pub struct Tracker {
    config: TrackerConfig,
    store: Arc<SampleStore>,
    source: Arc<dyn SampleSource>,
    sink: Arc<dyn RemoteSink>,
    credentials: Arc<dyn CredentialProvider>,
    sampler: Option<TaskHandle<SamplerReport>>,
    sync: Option<TaskHandle<SyncStats>>,
    sampler_state: Option<watch::Receiver<SamplerState>>,
}

impl Tracker {
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(
        config: TrackerConfig,
        store: Arc<SampleStore>,
        source: Arc<dyn SampleSource>,
        sink: Arc<dyn RemoteSink>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            source,
            sink,
            credentials,
            sampler: None,
            sync: None,
            sampler_state: None,
        })
    }

    /// Spawn the sampler and the sync engine on the current tokio runtime.
    ///
    /// Calling `start` while already running does nothing.
    #[instrument(skip(self, producer_id))]
    pub fn start(&mut self, producer_id: impl Into<String>) {
        if self.is_running() {
            warn!("Tracker already running, ignoring start");
            return;
        }

        let producer_id = producer_id.into();
        info!(producer_id = %producer_id, "Starting tracker");

        let sampler = Sampler::new(
            &self.config,
            self.store.clone(),
            self.source.clone(),
            producer_id,
        );
        self.sampler_state = Some(sampler.subscribe());
        self.sampler = Some(TaskHandle::spawn("sampler", move |shutdown| {
            sampler.run(shutdown)
        }));

        let engine = self.sync_engine();
        self.sync = Some(TaskHandle::spawn("sync", move |shutdown| {
            engine.run(shutdown)
        }));
    }

    /// Start with the provider's persisted producer identity.
    pub fn start_with_stored_identity(&mut self) -> String {
        let producer_id = self.credentials.producer_identity();
        self.start(producer_id.clone());
        producer_id
    }

    /// Cancel both loops and wait for them, including the final sync attempt.
    ///
    /// Idempotent: stopping a stopped tracker returns an empty report.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> TrackerReport {
        let sampler = self.sampler.take();
        let sync = self.sync.take();
        if sampler.is_none() && sync.is_none() {
            return TrackerReport::default();
        }

        // Both timers stop before the final sync runs.
        if let Some(handle) = &sampler {
            handle.cancel();
        }
        if let Some(handle) = &sync {
            handle.cancel();
        }

        let sampler = match sampler {
            Some(handle) => handle.join().await,
            None => None,
        };
        let sync = match sync {
            Some(handle) => handle.join().await,
            None => None,
        };

        info!("Tracker stopped");
        TrackerReport { sampler, sync }
    }

    /// True between `start` and `stop`, even after the sampler hit its budget.
    pub fn is_running(&self) -> bool {
        self.sampler.is_some() || self.sync.is_some()
    }

    /// Current state of the sampling loop.
    pub fn state(&self) -> SamplerState {
        self.sampler_state
            .as_ref()
            .map_or(SamplerState::Idle, |rx| *rx.borrow())
    }

    /// Resolve once the sampler has stopped, typically on its run budget.
    pub async fn wait_for_sampler(&self) {
        if let Some(rx) = &self.sampler_state {
            let mut rx = rx.clone();
            let _ = rx.wait_for(|state| *state == SamplerState::Stopped).await;
        }
    }

    /// Run a single sync cycle outside the periodic loop.
    ///
    /// Waits for a cycle already in flight, then drains whatever it left.
    pub async fn sync_now(&self) -> TrackerResult<CycleOutcome> {
        self.sync_engine().run_cycle().await
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            &self.config,
            self.store.clone(),
            self.sink.clone(),
            self.credentials.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SheetsConfig;
    use crate::credentials::MemoryCredentials;
    use crate::sink::SheetsClient;
    use crate::source::FixedSource;
    use std::time::Duration;

    fn tracker(config: TrackerConfig) -> Tracker {
        let sink =
            SheetsClient::new(SheetsConfig::new().with_endpoint("http://localhost:1")).unwrap();
        Tracker::new(
            config,
            Arc::new(SampleStore::in_memory().unwrap()),
            Arc::new(FixedSource::new(64)),
            Arc::new(sink),
            Arc::new(MemoryCredentials::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut tracker = tracker(TrackerConfig::new());
        assert_eq!(tracker.state(), SamplerState::Idle);

        let report = tracker.stop().await;
        assert!(report.sampler.is_none());

        tracker.start("device-1");
        assert!(tracker.is_running());

        let report = tracker.stop().await;
        assert!(report.sampler.is_some());
        assert!(report.sync.is_some());
        assert!(!tracker.is_running());
        assert_eq!(tracker.state(), SamplerState::Stopped);

        let again = tracker.stop().await;
        assert!(again.sampler.is_none() && again.sync.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_sampler_budget() {
        let mut tracker = tracker(
            TrackerConfig::new()
                .with_tick_interval(Duration::from_millis(100))
                .with_max_run_duration(Duration::from_millis(500)),
        );
        let producer_id = tracker.start_with_stored_identity();
        assert!(!producer_id.is_empty());

        tracker.wait_for_sampler().await;
        assert_eq!(tracker.state(), SamplerState::Stopped);
        assert_eq!(tracker.store().count().unwrap(), 5);

        let report = tracker.stop().await;
        assert_eq!(report.sampler.unwrap().inserted, 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let sink = SheetsClient::new(SheetsConfig::new()).unwrap();
        let result = Tracker::new(
            TrackerConfig::new().with_tick_interval(Duration::ZERO),
            Arc::new(SampleStore::in_memory().unwrap()),
            Arc::new(FixedSource::new(64)),
            Arc::new(sink),
            Arc::new(MemoryCredentials::new()),
        );
        assert!(result.is_err());
    }
}
