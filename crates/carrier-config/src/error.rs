//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration was not valid JSON or had unknown values.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value was out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_file() {
        let err = ConfigError::Read {
            path: PathBuf::from("/etc/carrier.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.to_string(), "failed to read config file '/etc/carrier.json': gone");
    }

    #[test]
    fn invalid_error_display() {
        let err = ConfigError::Invalid("workers.ingest must be greater than 0".to_string());
        assert_eq!(err.to_string(), "invalid config: workers.ingest must be greater than 0");
    }
}
