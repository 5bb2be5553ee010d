//! Error types for Filedock.

use thiserror::Error;

use crate::storage::ArchiveError;

/// Common error type for Filedock.
#[derive(Error, Debug)]
pub enum DockError {
    /// The client supplied a path that is malformed or escapes the storage root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Validation error for request input other than paths.
    #[error("validation error: {0}")]
    Validation(String),

    /// An uploaded file exceeded the configured size limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Unexpected filesystem failure (permission denied, disk full, cross-device rename, ...).
    #[error("filesystem error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// Archive construction failed before any bytes were streamed.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything unanticipated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DockError {
    /// Whether the error is attributable to the client rather than the server.
    ///
    /// Client errors are logged at most as warnings.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DockError::InvalidPath(_)
                | DockError::NotFound(_)
                | DockError::Validation(_)
                | DockError::PayloadTooLarge(_)
        )
    }
}

/// Result type alias for Filedock operations.
pub type Result<T> = std::result::Result<T, DockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let err = DockError::InvalidPath("../etc/passwd".to_string());
        assert_eq!(err.to_string(), "invalid path: ../etc/passwd");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = DockError::NotFound("a/b.txt".to_string());
        assert_eq!(err.to_string(), "a/b.txt not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DockError = io_err.into();
        assert!(matches!(err, DockError::FileSystem(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_is_client_error() {
        assert!(DockError::InvalidPath("x".into()).is_client_error());
        assert!(DockError::NotFound("x".into()).is_client_error());
        assert!(DockError::Validation("x".into()).is_client_error());
        assert!(DockError::PayloadTooLarge("x".into()).is_client_error());
        assert!(!DockError::Internal("x".into()).is_client_error());
        assert!(!DockError::Config("x".into()).is_client_error());
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!DockError::from(io_err).is_client_error());
    }
}
