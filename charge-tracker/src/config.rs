//! Runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::error::{TrackerError, TrackerResult};

/// Default Google Sheets API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://sheets.googleapis.com";

/// Configuration for the spreadsheet sink client.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    endpoint: String,
    range: String,
    timeout: Duration,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            range: "A:C".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl SheetsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom API endpoint (no trailing slash needed).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the A1 range rows are appended after.
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Configuration for the sampler, the sync engine and local state.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    tick_interval: Duration,
    max_run_duration: Duration,
    sync_interval: Duration,
    request_timeout: Duration,
    store_path: Option<PathBuf>,
    preferences_path: Option<PathBuf>,
    sheets: SheetsConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_run_duration: Duration::from_secs(10 * 60 * 60),
            sync_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            store_path: None,
            preferences_path: None,
            sheets: SheetsConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sampling interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the cap on a single sampling run.
    pub fn with_max_run_duration(mut self, duration: Duration) -> Self {
        self.max_run_duration = duration;
        self
    }

    /// Set the interval between sync cycles.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the hard bound on a single append call made by the sync engine.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_store_path(mut self, path: impl AsRef<Path>) -> Self {
        self.store_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_preferences_path(mut self, path: impl AsRef<Path>) -> Self {
        self.preferences_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_sheets(mut self, sheets: SheetsConfig) -> Self {
        self.sheets = sheets;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn max_run_duration(&self) -> Duration {
        self.max_run_duration
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn sheets(&self) -> &SheetsConfig {
        &self.sheets
    }

    /// The sample database path, defaulting to the platform data directory.
    pub fn store_path(&self) -> TrackerResult<PathBuf> {
        match &self.store_path {
            Some(p) => Ok(p.clone()),
            None => Ok(project_dirs()?.data_dir().join("samples.db")),
        }
    }

    /// The preferences file path, defaulting to the platform config directory.
    pub fn preferences_path(&self) -> TrackerResult<PathBuf> {
        match &self.preferences_path {
            Some(p) => Ok(p.clone()),
            None => Ok(project_dirs()?.config_dir().join("preferences.json")),
        }
    }

    /// Reject configurations that would spin or never sample.
    pub fn validate(&self) -> TrackerResult<()> {
        for (name, value) in [
            ("tick interval", self.tick_interval),
            ("sync interval", self.sync_interval),
            ("request timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(TrackerError::Configuration {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}

fn project_dirs() -> TrackerResult<ProjectDirs> {
    ProjectDirs::from("dev", "charge-tracker", "charge-tracker").ok_or_else(|| {
        TrackerError::Configuration {
            message: "Could not determine a home directory".to_string(),
        }
    })
}
