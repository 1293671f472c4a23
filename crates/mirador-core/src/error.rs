use thiserror::Error;

/// Application-wide error types for Mirador.
#[derive(Error, Debug)]
pub enum AppError {
    /// Remote answered with a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Response was fetched but is not something we store as a page.
    #[error("Unsupported content type '{content_type}' for {url}")]
    UnsupportedContentType { url: String, content_type: String },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The rendering strategy could not be started for this run.
    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// Snapshot tree I/O failed (directory creation, file write, rename).
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Backup archive could not be produced.
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// A stored snapshot could not be decrypted with the configured key.
    #[error("Decryption error: {0}")]
    DecryptionError(String),

    /// Configuration value missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Coarse classification used by callers to decide between skipping,
/// falling back and surfacing an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Skip the URL and continue the run.
    TransientFetch,
    /// Abandon rendering for the whole run.
    RendererUnavailable,
    /// Fatal for the current operation.
    Storage,
    /// Fatal for the one resource being read.
    Decryption,
    Configuration,
    Other,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::HttpError(_)
            | AppError::UnsupportedContentType { .. }
            | AppError::Timeout(_)
            | AppError::NetworkError(_) => ErrorKind::TransientFetch,
            AppError::RendererUnavailable(_) => ErrorKind::RendererUnavailable,
            AppError::StorageError(_) | AppError::DatabaseError(_) | AppError::ArchiveError(_) => {
                ErrorKind::Storage
            }
            AppError::DecryptionError(_) => ErrorKind::Decryption,
            AppError::ConfigError(_) => ErrorKind::Configuration,
            AppError::SerializationError(_) | AppError::Generic(_) => ErrorKind::Other,
        }
    }

    /// Returns true if this error only affects the URL being fetched.
    pub fn is_transient_fetch(&self) -> bool {
        self.kind() == ErrorKind::TransientFetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failures_are_transient() {
        assert!(AppError::HttpError("HTTP 404 for https://a".into()).is_transient_fetch());
        assert!(AppError::Timeout(20).is_transient_fetch());
        assert!(AppError::NetworkError("reset".into()).is_transient_fetch());
        assert!(
            AppError::UnsupportedContentType {
                url: "https://a/x.json".into(),
                content_type: "application/json".into(),
            }
            .is_transient_fetch()
        );
        assert!(!AppError::StorageError("disk full".into()).is_transient_fetch());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AppError::RendererUnavailable("no chrome".into()).kind(),
            ErrorKind::RendererUnavailable
        );
        assert_eq!(
            AppError::DatabaseError("locked".into()).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            AppError::ArchiveError("zip".into()).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            AppError::DecryptionError("tag mismatch".into()).kind(),
            ErrorKind::Decryption
        );
        assert_eq!(
            AppError::ConfigError("bad".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
