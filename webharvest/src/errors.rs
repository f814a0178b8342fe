//! Error types for the webharvest pipeline.
//!
//! Per-target errors (navigation, fetch, extraction) are contained in that
//! target's outcome and never abort a job; only configuration and session
//! infrastructure errors escalate.

use thiserror::Error;

use crate::config::RetryConfig;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Job configuration was rejected before the run started.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A controlled browser instance could not be established.
    #[error("{0}")]
    SessionStart(#[from] SessionStartError),

    /// Page navigation did not reach the readiness condition in time.
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout {
        /// The URL being navigated to.
        url: String,
        /// The deadline that passed, in milliseconds.
        timeout_ms: u64,
    },

    /// The browser reported a navigation failure (DNS, TLS, crash).
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// The URL being navigated to.
        url: String,
        /// The browser-reported failure.
        message: String,
    },

    /// A static HTTP fetch failed (transport error or error status).
    #[error("fetch of {url} failed: {message}")]
    Fetch {
        /// The URL being fetched.
        url: String,
        /// The HTTP status code, if a response was received.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// The target URL could not be parsed at all.
    #[error("invalid url {url}: {message}")]
    InvalidUrl {
        /// The malformed URL.
        url: String,
        /// The parse failure.
        message: String,
    },

    /// The fetched document could not be processed as a whole.
    #[error("extraction failed for target {target_id}: {message}")]
    Extraction {
        /// The target whose document was unprocessable.
        target_id: String,
        /// Description of the failure.
        message: String,
    },

    /// The operation was interrupted by cancellation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Serialization failure during export.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO failure during export.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Whether this failure class is worth retrying under the given policy.
    ///
    /// Timeouts, browser-reported navigation failures, and transport-level
    /// fetch errors are transient. HTTP statuses consult the policy's
    /// retryable set (429 and 5xx by default). Malformed URLs, other 4xx,
    /// extraction failures, and cancellation never retry.
    #[must_use]
    pub fn is_transient(&self, retry: &RetryConfig) -> bool {
        match self {
            Self::NavigationTimeout { .. } | Self::Navigation { .. } => true,
            Self::Fetch { status: Some(status), .. } => retry.should_retry_status(*status),
            Self::Fetch { status: None, .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a job's configuration is invalid.
///
/// This is fatal: the job never starts and no targets are processed.
#[derive(Debug, Clone, Error)]
#[error("configuration error: {message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The configuration field involved, if known.
    pub field: Option<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Sets the configuration field involved.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Error raised when a browser process cannot be started or the control
/// handshake does not complete within the bounded wait.
#[derive(Debug, Clone, Error)]
#[error("session start error: {message}")]
pub struct SessionStartError {
    /// The error message.
    pub message: String,
}

impl SessionStartError {
    /// Creates a new session start error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let retry = RetryConfig::default();

        let timeout = HarvestError::NavigationTimeout {
            url: "https://example.com".to_string(),
            timeout_ms: 30_000,
        };
        assert!(timeout.is_transient(&retry));

        let transport = HarvestError::Fetch {
            url: "https://example.com".to_string(),
            status: None,
            message: "connection reset".to_string(),
        };
        assert!(transport.is_transient(&retry));

        let server_error = HarvestError::Fetch {
            url: "https://example.com".to_string(),
            status: Some(503),
            message: "http status 503".to_string(),
        };
        assert!(server_error.is_transient(&retry));

        let rate_limited = HarvestError::Fetch {
            url: "https://example.com".to_string(),
            status: Some(429),
            message: "http status 429".to_string(),
        };
        assert!(rate_limited.is_transient(&retry));

        let not_found = HarvestError::Fetch {
            url: "https://example.com".to_string(),
            status: Some(404),
            message: "http status 404".to_string(),
        };
        assert!(!not_found.is_transient(&retry));

        let malformed = HarvestError::InvalidUrl {
            url: "not a url".to_string(),
            message: "relative URL without a base".to_string(),
        };
        assert!(!malformed.is_transient(&retry));
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::new("rule set is empty").with_field("rules");
        assert_eq!(err.to_string(), "configuration error: rule set is empty");
        assert_eq!(err.field.as_deref(), Some("rules"));
    }

    #[test]
    fn test_session_start_error_wraps() {
        let err: HarvestError = SessionStartError::new("handshake timed out").into();
        assert!(err.to_string().contains("handshake timed out"));
    }
}
