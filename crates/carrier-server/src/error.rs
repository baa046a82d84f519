//! Error types for the carrier server.

use carrier_buffer::{BufferError, SnapshotError};
use carrier_config::{ConfigError, RotationMethod};
use thiserror::Error;

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A buffering pipeline failed.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// An I/O error outside the pipelines, e.g. on the checkpoint file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A guided rotation was requested while the method forbids it.
    #[error("guided rotation is not allowed with rotation method {0}")]
    RotationNotAllowed(RotationMethod),

    /// The server no longer accepts requests.
    #[error("server is shutting down")]
    ShuttingDown,

    /// A stream could not be restored from the checkpoint.
    #[error("failed to restore stream {stream}: {source}")]
    Restore {
        /// Stream being restored, as `dir/name/group`.
        stream: String,
        /// What went wrong.
        #[source]
        source: BufferError,
    },
}

impl From<SnapshotError> for ServerError {
    fn from(err: SnapshotError) -> Self {
        Self::Buffer(BufferError::Snapshot(err))
    }
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_not_allowed_names_method() {
        let err = ServerError::RotationNotAllowed(RotationMethod::Periodic);
        assert_eq!(
            err.to_string(),
            "guided rotation is not allowed with rotation method periodic"
        );
    }

    #[test]
    fn restore_error_names_stream() {
        let err = ServerError::Restore {
            stream: "nginx/access/".to_string(),
            source: BufferError::Snapshot(SnapshotError::TrailingBytes(3)),
        };
        assert_eq!(
            err.to_string(),
            "failed to restore stream nginx/access/: corrupt snapshot: snapshot has 3 trailing bytes"
        );
    }

    #[test]
    fn snapshot_error_converts_to_buffer_error() {
        let err: ServerError = SnapshotError::BadMagic.into();
        assert!(matches!(err, ServerError::Buffer(BufferError::Snapshot(SnapshotError::BadMagic))));
    }
}
