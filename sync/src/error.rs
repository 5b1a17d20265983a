//! Error types for the sync engine library

use serde::{Deserialize, Serialize};

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Classified failure recorded on plan items and run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Source or target could not be listed; aborts that target only
    CatalogUnavailable,
    /// Network/timeout class failure, eligible for retry
    Transient,
    /// Auth/quota/invalid-path class failure, never retried
    PermanentFailure,
    /// Transient failure that exhausted every attempt
    SyncFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::CatalogUnavailable => write!(f, "catalog unavailable"),
            ErrorKind::Transient => write!(f, "transient failure"),
            ErrorKind::PermanentFailure => write!(f, "permanent failure"),
            ErrorKind::SyncFailed => write!(f, "sync failed"),
        }
    }
}

/// Errors raised by backend adapters
///
/// Every variant is classified as either transient or permanent so the retry
/// policy can decide whether another attempt is worthwhile.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Network, timeout or server-side failure
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Authentication, authorization, quota or similar failure
    #[error("permanent backend error: {0}")]
    Permanent(String),

    /// The path is not acceptable to the backend
    #[error("invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// Requested object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Backend root could not be reached at all
    #[error("backend '{name}' is unavailable: {message}")]
    Unavailable { name: String, message: String },

    /// No adapter is registered for the configured backend type
    #[error("no backend adapter registered for type '{0}'")]
    UnsupportedType(String),

    /// Local IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transient(_) => true,
            BackendError::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::InvalidData
                    | std::io::ErrorKind::AlreadyExists
                    | std::io::ErrorKind::Unsupported
            ),
            _ => false,
        }
    }

    /// Error kind for a single failed attempt
    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Transient
        } else {
            ErrorKind::PermanentFailure
        }
    }

    /// Create a new invalid path error
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new unavailable error
    pub fn unavailable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Engine-level error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A source or target could not be listed
    #[error("catalog for '{name}' is unavailable: {source}")]
    CatalogUnavailable {
        name: String,
        #[source]
        source: BackendError,
    },

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filter pattern errors
    #[error("Filter pattern error: {0}")]
    FilterPattern(String),

    /// Duplicate path inside one catalog or plan
    #[error("duplicate path '{0}'")]
    DuplicatePath(String),

    /// Progress reporting errors
    #[error("Progress reporting error: {0}")]
    Progress(String),
}

impl SyncError {
    /// Create a new catalog unavailable error
    pub fn catalog_unavailable(name: impl Into<String>, source: BackendError) -> Self {
        Self::CatalogUnavailable {
            name: name.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The taxonomy kind of this error, if it maps onto one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::CatalogUnavailable { .. } => Some(ErrorKind::CatalogUnavailable),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(std::io::ErrorKind::TimedOut, true ; "timeout retries")]
    #[test_case(std::io::ErrorKind::ConnectionReset, true ; "reset retries")]
    #[test_case(std::io::ErrorKind::Interrupted, true ; "interrupted retries")]
    #[test_case(std::io::ErrorKind::PermissionDenied, false ; "permission is permanent")]
    #[test_case(std::io::ErrorKind::NotFound, false ; "missing is permanent")]
    fn test_io_classification(kind: std::io::ErrorKind, retryable: bool) {
        let err = BackendError::from(std::io::Error::new(kind, "boom"));
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(BackendError::Transient("503".into()).kind(), ErrorKind::Transient);
        assert_eq!(BackendError::Permanent("403".into()).kind(), ErrorKind::PermanentFailure);
        assert_eq!(
            BackendError::invalid_path("../x", "escapes root").kind(),
            ErrorKind::PermanentFailure
        );

        let err = SyncError::catalog_unavailable("cdn", BackendError::unavailable("cdn", "down"));
        assert_eq!(err.kind(), Some(ErrorKind::CatalogUnavailable));
        assert_eq!(SyncError::config("bad").kind(), None);
    }
}
