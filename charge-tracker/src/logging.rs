//! Structured logging setup.
//!
//! Library code only emits `tracing` events; binaries call
//! [`init_logging`] once to install a subscriber.

use tracing::Level;

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for dependencies
    pub level: Level,
    /// Log level for this crate
    pub tracker_level: Level,
    /// Whether to use JSON output format
    pub json_format: bool,
    /// Environment filter override
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            tracker_level: Level::INFO,
            json_format: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// JSON lines at info level, suited to a supervised service.
    pub fn production() -> Self {
        Self {
            level: Level::WARN,
            tracker_level: Level::INFO,
            json_format: true,
            env_filter: None,
        }
    }

    /// Human-readable output with per-sample debug events.
    pub fn development() -> Self {
        Self {
            level: Level::INFO,
            tracker_level: Level::DEBUG,
            json_format: false,
            env_filter: None,
        }
    }

    pub fn with_tracker_level(mut self, level: Level) -> Self {
        self.tracker_level = level;
        self
    }

    pub fn with_json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Builds the environment filter string.
    pub fn env_filter(&self) -> String {
        if let Some(ref filter) = self.env_filter {
            filter.clone()
        } else {
            format!(
                "{},charge_tracker={}",
                self.level.as_str().to_lowercase(),
                self.tracker_level.as_str().to_lowercase()
            )
        }
    }
}

/// Install a global subscriber. `RUST_LOG` takes precedence over `config`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

    let fmt_layer = if config.json_format {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
