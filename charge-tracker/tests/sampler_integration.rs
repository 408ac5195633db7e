use std::sync::Arc;
use std::time::Duration;

use charge_tracker::prelude::*;
use charge_tracker::sampler::Sampler;
use chrono::Utc;
use tokio::sync::watch;

fn config(tick_ms: u64, budget_ms: u64) -> TrackerConfig {
    TrackerConfig::new()
        .with_tick_interval(Duration::from_millis(tick_ms))
        .with_max_run_duration(Duration::from_millis(budget_ms))
}

#[tokio::test(start_paused = true)]
async fn test_sampler_stops_itself_on_budget() {
    let store = Arc::new(SampleStore::in_memory().unwrap());
    let sampler = Sampler::new(
        &config(1000, 3000),
        store.clone(),
        Arc::new(FixedSource::new(80)),
        "device-1".to_string(),
    );
    let mut state = sampler.subscribe();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(sampler.run(shutdown_rx));
    state
        .wait_for(|s| *s == SamplerState::Stopped)
        .await
        .expect("sampler dropped its state channel");
    let report = handle.await.unwrap();

    assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
    let rows = store.count().unwrap();
    assert!((2..=4).contains(&rows), "expected 3 +/- 1 rows, got {rows}");
    assert_eq!(report.inserted as usize, rows);
}

#[tokio::test]
async fn test_no_sample_taken_after_budget() {
    let store = Arc::new(SampleStore::in_memory().unwrap());
    let budget_ms = 250;
    let sampler = Sampler::new(
        &config(50, budget_ms),
        store.clone(),
        Arc::new(FixedSource::new(42)),
        "device-1".to_string(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = Utc::now().timestamp_millis();
    let report = sampler.run(shutdown_rx).await;

    assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
    let samples = store.unsynced().unwrap();
    assert!(
        (4..=6).contains(&samples.len()),
        "expected 5 +/- 1 rows, got {}",
        samples.len()
    );
    for sample in &samples {
        assert!(sample.timestamp >= started);
        assert!(sample.timestamp - started < budget_ms as i64);
        assert_eq!(sample.value, 42);
        assert!(!sample.synced);
    }
}

#[tokio::test(start_paused = true)]
async fn test_tracker_keeps_syncing_after_sampler_budget() {
    let store = Arc::new(SampleStore::in_memory().unwrap());
    let sink = SheetsClient::new(SheetsConfig::new().with_endpoint("http://localhost:1")).unwrap();
    let mut tracker = Tracker::new(
        config(1000, 3000),
        store.clone(),
        Arc::new(FixedSource::new(80)),
        Arc::new(sink),
        Arc::new(MemoryCredentials::new().with_producer_identity("device-7")),
    )
    .unwrap();

    assert_eq!(tracker.start_with_stored_identity(), "device-7");
    tracker.wait_for_sampler().await;

    assert_eq!(tracker.state(), SamplerState::Stopped);
    assert!(tracker.is_running());

    let report = tracker.stop().await;
    let sync = report.sync.expect("sync loop report");
    assert!(sync.cycles >= 1);
    assert_eq!(sync.rows_synced, 0);
    assert_eq!(store.unsynced_count().unwrap(), 3);
}
