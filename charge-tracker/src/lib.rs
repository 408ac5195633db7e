//! # charge-tracker
//!
//! Samples battery charge on a fixed cadence, buffers every reading in a local
//! SQLite store, and forwards unsent readings to a Google Sheets spreadsheet
//! with at-least-once delivery.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use charge_tracker::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = TrackerConfig::new();
//! let store = Arc::new(SampleStore::open(&config.store_path()?)?);
//! let credentials = Arc::new(FileCredentialStore::open(config.preferences_path()?)?);
//! let source = Arc::new(PowerSupplySource::discover(POWER_SUPPLY_ROOT)?);
//! let sink = Arc::new(SheetsClient::new(config.sheets().clone())?);
//!
//! let mut tracker = Tracker::new(config, store, source, sink, credentials)?;
//! tracker.start_with_stored_identity();
//!
//! // Runs until the 10 hour budget is spent.
//! tracker.wait_for_sampler().await;
//! let report = tracker.stop().await;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`source`**: where readings come from
//! - **`store`**: the synced/unsynced sample table
//! - **`sampler`**: the budgeted sampling loop
//! - **`sync`**: the batch upload cycle and its compaction step
//! - **`lock`**: one draining process per store file
//! - **`sink`**: the remote append API client
//! - **`credentials`**: destination, token and producer identity storage
//! - **`tracker`**: start/stop control over both loops

pub mod config;
pub mod credentials;
pub mod error;
pub mod lock;
pub mod logging;
pub mod prelude;
pub mod sample;
pub mod sampler;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod store;
pub mod sync;
pub mod tracker;
