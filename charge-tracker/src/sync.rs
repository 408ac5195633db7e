//! Drains unsynced samples to the remote sink.
//!
//! Delivery is at-least-once. A batch is marked synced only after the sink
//! confirms a non-zero row count, and then the whole batch is marked: the
//! append API reports how many rows landed, not which. If the process dies
//! between that confirmation and the local mark, the next cycle resends the
//! same rows and the sink ends up with duplicates. The sink is append-only
//! telemetry with no dedup key, so this is accepted rather than papered over.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::TrackerConfig;
use crate::credentials::{AccessToken, CredentialProvider};
use crate::error::{TrackerError, TrackerResult};
use crate::sample::Batch;
use crate::scheduler::cancelled;
use crate::sink::RemoteSink;
use crate::store::SampleStore;

/// What a single sync cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No destination or credential configured; nothing was sent.
    Skipped,
    /// There were no unsynced samples.
    NothingToSync,
    /// The sink answered but reported zero rows written; nothing was marked.
    NotAccepted { sent: usize },
    /// The batch was accepted and marked synced.
    Synced { marked: usize, compacted: usize },
}

impl CycleOutcome {
    pub fn rows_synced(&self) -> usize {
        match self {
            CycleOutcome::Synced { marked, .. } => *marked,
            _ => 0,
        }
    }
}

/// Statistics accumulated by the sync engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub failed_cycles: u64,
    pub batches_sent: u64,
    pub rows_synced: u64,
    pub rows_compacted: u64,
}

/// Periodically forwards the store's unsynced partition to a [`RemoteSink`].
pub struct SyncEngine {
    store: Arc<SampleStore>,
    sink: Arc<dyn RemoteSink>,
    credentials: Arc<dyn CredentialProvider>,
    sync_interval: Duration,
    request_timeout: Duration,
    stats: SyncStats,
}

impl SyncEngine {
    pub fn new(
        config: &TrackerConfig,
        store: Arc<SampleStore>,
        sink: Arc<dyn RemoteSink>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            store,
            sink,
            credentials,
            sync_interval: config.sync_interval(),
            request_timeout: config.request_timeout(),
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Run cycles on the sync interval until shutdown, then make one final
    /// best-effort attempt before returning the accumulated statistics.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SyncStats {
        info!(
            interval_secs = self.sync_interval.as_secs(),
            "Sync engine started"
        );
        let mut ticker = interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Shutdown signal received, attempting final sync");
        self.tick().await;

        info!(
            "Sync engine stopped: {} rows synced in {} batches, {} failed cycles, {} rows compacted",
            self.stats.rows_synced,
            self.stats.batches_sent,
            self.stats.failed_cycles,
            self.stats.rows_compacted
        );
        self.stats
    }

    /// One cycle with errors caught and recorded; never fails.
    async fn tick(&mut self) {
        match self.run_cycle().await {
            Ok(CycleOutcome::Synced { marked, compacted }) => {
                info!(marked, compacted, "Synced samples");
            }
            Ok(CycleOutcome::NotAccepted { sent }) => {
                warn!(sent, "Sink reported no rows written; batch will be resent");
            }
            Ok(_) => {}
            Err(e) if e.is_retryable() => warn!("Sync cycle failed, will retry: {}", e),
            Err(e) => error!("Sync cycle failed: {}", e),
        }
    }

    /// Perform one sync cycle.
    ///
    /// Waits for any cycle already draining the same store to finish first.
    ///
    /// # Errors
    ///
    /// Returns the sink or storage error that ended the cycle. No rows are
    /// marked synced when an error is returned from the append.
    pub async fn run_cycle(&mut self) -> TrackerResult<CycleOutcome> {
        let store = self.store.clone();
        let _claim = store.claim_consumer().await;

        self.stats.cycles += 1;
        let result = self.cycle().await;

        match &result {
            Ok(CycleOutcome::Skipped) => self.stats.skipped_cycles += 1,
            Ok(CycleOutcome::Synced { marked, compacted }) => {
                self.stats.rows_synced += *marked as u64;
                self.stats.rows_compacted += *compacted as u64;
            }
            Ok(_) => {}
            Err(_) => self.stats.failed_cycles += 1,
        }
        result
    }

    async fn cycle(&mut self) -> TrackerResult<CycleOutcome> {
        let (destination_id, credential) = match self.resolve_target() {
            Ok(target) => target,
            Err(e) if e.is_skip() => {
                debug!("Sync skipped: {}", e);
                return Ok(CycleOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let samples = self.store.unsynced()?;
        if samples.is_empty() {
            return Ok(CycleOutcome::NothingToSync);
        }

        let batch = Batch::from_samples(&samples);
        debug!(rows = batch.len(), "Sending batch");

        let receipt = tokio::time::timeout(
            self.request_timeout,
            self.sink.append(&destination_id, &credential, batch.rows()),
        )
        .await
        .map_err(|_| {
            TrackerError::transport(format!(
                "Append timed out after {}s",
                self.request_timeout.as_secs()
            ))
        })??;
        self.stats.batches_sent += 1;

        if receipt.accepted_count == 0 {
            return Ok(CycleOutcome::NotAccepted { sent: batch.len() });
        }
        if receipt.accepted_count != batch.len() as u64 {
            warn!(
                sent = batch.len(),
                accepted = receipt.accepted_count,
                "Sink row count differs from batch size; marking whole batch"
            );
        }

        let marked = self.store.mark_synced(batch.ids()).map_err(|e| {
            error!("Batch accepted but could not be marked synced; it will be resent");
            e
        })?;

        let compacted = if marked > 0 {
            self.store.delete_synced().unwrap_or_else(|e| {
                warn!("Compaction failed: {}", e);
                0
            })
        } else {
            0
        };

        Ok(CycleOutcome::Synced { marked, compacted })
    }

    fn resolve_target(&self) -> TrackerResult<(String, AccessToken)> {
        let destination_id = self
            .credentials
            .destination_id()
            .ok_or(TrackerError::DestinationAbsent)?;
        let credential = self
            .credentials
            .credential()
            .ok_or(TrackerError::CredentialAbsent)?;
        Ok((destination_id, credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentials;
    use crate::sample::SampleRow;
    use crate::sink::AppendReceipt;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Sink that replays scripted responses and records what it was sent.
    struct ScriptedSink {
        responses: Mutex<Vec<TrackerResult<AppendReceipt>>>,
        sent: Mutex<Vec<Vec<SampleRow>>>,
    }

    impl ScriptedSink {
        fn new(responses: Vec<TrackerResult<AppendReceipt>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteSink for ScriptedSink {
        async fn append(
            &self,
            _destination_id: &str,
            _credential: &AccessToken,
            rows: &[SampleRow],
        ) -> TrackerResult<AppendReceipt> {
            self.sent.lock().unwrap().push(rows.to_vec());
            self.responses.lock().unwrap().remove(0)
        }

        async fn check_access(&self, _destination_id: &str, _credential: &AccessToken) -> bool {
            true
        }
    }

    struct StalledSink;

    #[async_trait]
    impl RemoteSink for StalledSink {
        async fn append(
            &self,
            _destination_id: &str,
            _credential: &AccessToken,
            _rows: &[SampleRow],
        ) -> TrackerResult<AppendReceipt> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(AppendReceipt { accepted_count: 1 })
        }

        async fn check_access(&self, _destination_id: &str, _credential: &AccessToken) -> bool {
            false
        }
    }

    /// Accepts everything, slowly.
    struct SlowSink {
        sent: Mutex<Vec<Vec<SampleRow>>>,
    }

    #[async_trait]
    impl RemoteSink for SlowSink {
        async fn append(
            &self,
            _destination_id: &str,
            _credential: &AccessToken,
            rows: &[SampleRow],
        ) -> TrackerResult<AppendReceipt> {
            self.sent.lock().unwrap().push(rows.to_vec());
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(AppendReceipt {
                accepted_count: rows.len() as u64,
            })
        }

        async fn check_access(&self, _destination_id: &str, _credential: &AccessToken) -> bool {
            true
        }
    }

    fn engine(store: &Arc<SampleStore>, sink: Arc<dyn RemoteSink>) -> SyncEngine {
        SyncEngine::new(
            &TrackerConfig::new(),
            store.clone(),
            sink,
            Arc::new(MemoryCredentials::configured("sheet-1", "token")),
        )
    }

    fn seeded_store() -> Arc<SampleStore> {
        let store = Arc::new(SampleStore::in_memory().unwrap());
        store.insert("device-1", 0, 80).unwrap();
        store.insert("device-1", 1000, 79).unwrap();
        store
    }

    #[tokio::test]
    async fn test_zero_accepted_marks_nothing() {
        let store = seeded_store();
        let sink = Arc::new(ScriptedSink::new(vec![Ok(AppendReceipt {
            accepted_count: 0,
        })]));
        let mut engine = engine(&store, sink.clone());

        let outcome = engine.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::NotAccepted { sent: 2 });
        assert_eq!(store.unsynced_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_partial_count_marks_whole_batch() {
        let store = seeded_store();
        let sink = Arc::new(ScriptedSink::new(vec![Ok(AppendReceipt {
            accepted_count: 1,
        })]));
        let mut engine = engine(&store, sink);

        let outcome = engine.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Synced {
                marked: 2,
                compacted: 2
            }
        );
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_keeps_rows_and_counts_failure() {
        let store = seeded_store();
        let sink = Arc::new(ScriptedSink::new(vec![Err(TrackerError::Unauthorized {
            message: "expired".to_string(),
        })]));
        let mut engine = engine(&store, sink);

        let result = engine.run_cycle().await;
        assert!(matches!(result, Err(TrackerError::Unauthorized { .. })));
        assert_eq!(store.unsynced_count().unwrap(), 2);
        assert_eq!(engine.stats().failed_cycles, 1);
    }

    #[tokio::test]
    async fn test_empty_store_makes_no_call() {
        let store = Arc::new(SampleStore::in_memory().unwrap());
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let mut engine = engine(&store, sink.clone());

        assert_eq!(
            engine.run_cycle().await.unwrap(),
            CycleOutcome::NothingToSync
        );
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_skips() {
        let store = seeded_store();
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let credentials = MemoryCredentials::new();
        credentials.set_destination_id("sheet-1").unwrap();
        let mut engine = SyncEngine::new(
            &TrackerConfig::new(),
            store.clone(),
            sink.clone(),
            Arc::new(credentials),
        );

        assert_eq!(engine.run_cycle().await.unwrap(), CycleOutcome::Skipped);
        assert_eq!(sink.calls(), 0);
        assert_eq!(engine.stats().skipped_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_send_each_row_once() {
        let store = seeded_store();
        let sink = Arc::new(SlowSink {
            sent: Mutex::new(Vec::new()),
        });
        let mut periodic = engine(&store, sink.clone());
        let mut manual = engine(&store, sink.clone());

        let (first, second) = tokio::join!(periodic.run_cycle(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manual.run_cycle().await
        });

        assert_eq!(first.unwrap().rows_synced(), 2);
        assert_eq!(second.unwrap(), CycleOutcome::NothingToSync);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_timeout_is_transport() {
        let store = seeded_store();
        let mut engine = SyncEngine::new(
            &TrackerConfig::new().with_request_timeout(Duration::from_secs(30)),
            store.clone(),
            Arc::new(StalledSink),
            Arc::new(MemoryCredentials::configured("sheet-1", "token")),
        );

        let result = engine.run_cycle().await;
        assert!(matches!(result, Err(TrackerError::Transport { .. })));
        assert_eq!(store.unsynced_count().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_makes_final_attempt_on_shutdown() {
        let store = Arc::new(SampleStore::in_memory().unwrap());
        let sink = Arc::new(ScriptedSink::new(vec![Ok(AppendReceipt {
            accepted_count: 1,
        })]));
        let engine = SyncEngine::new(
            &TrackerConfig::new().with_sync_interval(Duration::from_secs(60)),
            store.clone(),
            sink.clone(),
            Arc::new(MemoryCredentials::configured("sheet-1", "token")),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(rx));

        // First cycle runs immediately on an empty store.
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.insert("device-1", 5, 77).unwrap();
        tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(sink.calls(), 1);
        assert_eq!(stats.rows_synced, 1);
        assert_eq!(store.count().unwrap(), 0);
    }
}
