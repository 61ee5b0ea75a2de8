//! Error taxonomy for the guidance control plane.
//!
//! One structured error type built on [`thiserror`]. Callers pattern-match
//! on the variants rather than parsing messages:
//!
//! - [`GuidanceError::Config`] — malformed rules document, unknown risk
//!   class, invalid glob in configuration
//! - [`GuidanceError::InvalidState`] — ledger mutation after finalization,
//!   double-finalize, optimizer reentry
//! - [`GuidanceError::Pattern`] — invalid user-supplied regex
//! - [`GuidanceError::Capability`] — embedding provider or A/B executor
//!   failure
//! - [`GuidanceError::Timeout`] — A/B execution exceeded its deadline
//! - [`GuidanceError::Persistence`] — ledger/tracker file I/O failure; the
//!   in-memory state stays consistent

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, GuidanceError>;

/// Top-level error type for the control plane.
#[derive(Debug, Error)]
pub enum GuidanceError {
    /// Invalid configuration or rules document.
    #[error("configuration error: {message}")]
    Config {
        /// Description of what was malformed.
        message: String,
    },

    /// An operation was attempted in a state that forbids it.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated lifecycle constraint.
        message: String,
    },

    /// A user-supplied regex failed to compile.
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        /// The pattern source text.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A pluggable capability (embedding provider, A/B executor) failed.
    #[error("capability `{capability}` failed: {message}")]
    Capability {
        /// Name of the failing capability.
        capability: String,
        /// Failure description.
        message: String,
    },

    /// An A/B execution exceeded its caller-supplied deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Persisting state to disk failed.
    #[error("persistence failed on {path}: {source}")]
    Persistence {
        /// The file that could not be written or read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl GuidanceError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid-state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a capability error.
    #[must_use]
    pub fn capability(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error for the given path.
    #[must_use]
    pub fn persistence(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Machine-readable error code for logs and wire records.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Pattern { .. } => "PATTERN_ERROR",
            Self::Capability { .. } => "CAPABILITY_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
        }
    }

    /// Whether the failed operation can be retried without intervention.
    ///
    /// Only capability and timeout failures are transient; everything else
    /// requires a config or caller fix.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Capability { .. } | Self::Timeout { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_code_and_message() {
        let err = GuidanceError::config("unknown risk class `extreme`");
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("unknown risk class"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_state_code() {
        let err = GuidanceError::invalid_state("event already finalized");
        assert_eq!(err.code(), "INVALID_STATE");
        assert!(err.to_string().contains("already finalized"));
    }

    #[test]
    fn pattern_error_carries_source() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = GuidanceError::Pattern {
            pattern: "(".into(),
            source,
        };
        assert_eq!(err.code(), "PATTERN_ERROR");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn capability_error_is_retryable() {
        let err = GuidanceError::capability("embedding", "provider unavailable");
        assert_eq!(err.code(), "CAPABILITY_ERROR");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("embedding"));
    }

    #[test]
    fn timeout_is_retryable() {
        let err = GuidanceError::Timeout {
            operation: "ab-evaluation".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("30000ms"));
    }

    #[test]
    fn persistence_error_carries_path_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = GuidanceError::persistence("events.log", io);
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
        assert!(err.to_string().contains("events.log"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn errors_are_std_error() {
        let err = GuidanceError::config("x");
        let _: &dyn std::error::Error = &err;
    }
}
