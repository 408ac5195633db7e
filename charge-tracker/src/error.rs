use thiserror::Error;

/// Errors produced by the sampling, storage and sync pipeline.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The local sample store could not be opened, read or written.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// The sample source could not produce a reading.
    #[error("Sample source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// No access credential is configured.
    #[error("No access credential configured")]
    CredentialAbsent,

    /// No destination identifier is configured.
    #[error("No destination configured")]
    DestinationAbsent,

    /// The remote sink rejected the credential (HTTP 401/403).
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The destination does not exist or is not addressable.
    #[error("Destination not found: {message}")]
    DestinationNotFound { message: String },

    /// Connection failure, timeout, or a transient server-side error.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The request or the response could not be interpreted.
    #[error("Malformed exchange: {message}")]
    Malformed { message: String },

    /// Another process is already draining the same store.
    #[error("Store in use: {message}")]
    StoreLocked { message: String },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl TrackerError {
    pub fn storage(message: impl Into<String>) -> Self {
        TrackerError::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        TrackerError::Transport {
            message: message.into(),
        }
    }

    /// Returns true if resending the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::Transport { .. } | TrackerError::StorageUnavailable { .. }
        )
    }

    /// Returns true if the error means "nothing to do yet" rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            TrackerError::CredentialAbsent | TrackerError::DestinationAbsent
        )
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::storage(e.to_string())
    }
}

/// Result type for tracker operations.
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_error_display() {
        let err = TrackerError::Unauthorized {
            message: "token expired".to_string(),
        };
        assert!(err.to_string().contains("token expired"));
    }

    #[test]
    fn test_tracker_error_classification() {
        assert!(TrackerError::transport("timeout").is_retryable());
        assert!(!TrackerError::Malformed {
            message: "bad json".to_string()
        }
        .is_retryable());
        assert!(TrackerError::DestinationAbsent.is_skip());
        assert!(TrackerError::CredentialAbsent.is_skip());
        assert!(!TrackerError::DestinationNotFound {
            message: "404".to_string()
        }
        .is_skip());
    }
}
