//! # carrier-config
//!
//! Configuration for the log carrier server.
//!
//! This crate provides:
//!
//! - [`Config`]: the complete server configuration, loaded from JSON
//! - [`CompressionMethod`], [`RotationMethod`], [`NotifierConfig`]: closed
//!   value sets, rejected while parsing when unknown
//! - [`ConfigError`]: load and validation failures
//!
//! ## Example
//!
//! ```rust
//! use carrier_config::{CompressionMethod, Config};
//!
//! let config = Config::from_json(r#"{"compression": {"method": "zstd"}}"#).unwrap();
//! assert_eq!(config.compression.method, CompressionMethod::Zstd);
//! assert_eq!(config.buffers.input, 128 * 1024);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export main types
pub use config::{
    BufferConfig, CompressionConfig, CompressionMethod, Config, DEFAULT_NAME_TEMPLATE, DEFAULT_ROTATION_TEMPLATE,
    FileConfig, LinksConfig, LoggingConfig, LogrotateConfig, MAX_ZSTD_LEVEL, NotifierConfig, RotationMethod,
    WorkerConfig,
};
pub use error::{ConfigError, Result};
