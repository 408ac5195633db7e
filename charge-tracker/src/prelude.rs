//! Prelude for commonly used types and traits in charge-tracker.

pub use crate::config::{SheetsConfig, TrackerConfig};
pub use crate::credentials::{
    AccessToken, CredentialProvider, FileCredentialStore, MemoryCredentials,
};
pub use crate::error::{TrackerError, TrackerResult};
pub use crate::lock::StoreLock;
pub use crate::sample::{Sample, SampleId, SampleRow};
pub use crate::sampler::{SamplerReport, SamplerState, StopReason};
pub use crate::sink::{AppendReceipt, RemoteSink, SheetsClient};
pub use crate::source::{FixedSource, PowerSupplySource, SampleSource, POWER_SUPPLY_ROOT};
pub use crate::store::SampleStore;
pub use crate::sync::{CycleOutcome, SyncEngine, SyncStats};
pub use crate::tracker::{Tracker, TrackerReport};
