//! Remote append-only sinks.

mod sheets;

pub use sheets::{
    AppendRequest, AppendResponse, SheetsClient, SpreadsheetMetadata, SpreadsheetProperties,
    UpdateSummary,
};

use async_trait::async_trait;

use crate::credentials::AccessToken;
use crate::error::TrackerResult;
use crate::sample::SampleRow;

/// Outcome of a confirmed append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Rows the sink reports as written. Says nothing about which rows.
    pub accepted_count: u64,
}

/// The remote service samples are forwarded to.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Append `rows`, in order, to the destination.
    ///
    /// # Errors
    ///
    /// Fails with `Unauthorized`, `DestinationNotFound`, `Transport` or
    /// `Malformed`.
    async fn append(
        &self,
        destination_id: &str,
        credential: &AccessToken,
        rows: &[SampleRow],
    ) -> TrackerResult<AppendReceipt>;

    /// Read-only check of whether the destination exists and is writable
    /// with this credential. Used by setup, not by sync cycles.
    async fn check_access(&self, destination_id: &str, credential: &AccessToken) -> bool;
}
