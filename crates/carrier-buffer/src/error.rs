//! Error types for the buffering pipeline.

use thiserror::Error;

/// Errors raised while decoding a persisted snapshot.
///
/// Every variant is fatal for the stream being restored: a stream must not
/// start accepting writes with partially reconstructed state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// The blob ended before a field could be read.
    #[error("snapshot truncated: {layer}.{field}")]
    Truncated {
        /// Layer being decoded.
        layer: &'static str,
        /// Field being decoded.
        field: &'static str,
    },

    /// A layer header announced a different number of fields than its schema.
    #[error("snapshot layer {layer}: expected {expected} fields, found {found}")]
    FieldCount {
        /// Layer being decoded.
        layer: &'static str,
        /// Field count from the schema.
        expected: u32,
        /// Field count found in the blob.
        found: u32,
    },

    /// A boolean field held something other than 0 or 1.
    #[error("snapshot field {layer}.{field}: invalid boolean byte {value:#04x}")]
    InvalidBool {
        /// Layer being decoded.
        layer: &'static str,
        /// Field being decoded.
        field: &'static str,
        /// Offending byte.
        value: u8,
    },

    /// A string field was not valid UTF-8.
    #[error("snapshot field {layer}.{field}: invalid UTF-8")]
    InvalidUtf8 {
        /// Layer being decoded.
        layer: &'static str,
        /// Field being decoded.
        field: &'static str,
    },

    /// Bytes remained after the last layer was decoded.
    #[error("snapshot has {0} trailing bytes")]
    TrailingBytes(usize),

    /// A field was read or written out of schema order.
    #[error("snapshot layer {layer}: field {field} does not match the schema")]
    SchemaMismatch {
        /// Layer being processed.
        layer: &'static str,
        /// Field that was requested.
        field: &'static str,
    },

    /// A bufferer kind tag was not recognized.
    #[error("unknown bufferer kind tag {0}")]
    UnknownKind(u32),

    /// A checkpoint file did not start with the expected magic bytes.
    #[error("not a checkpoint file (bad magic)")]
    BadMagic,

    /// A checkpoint file was written by an unsupported format version.
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    /// A field held a value the layer can not accept.
    #[error("snapshot field {layer}.{field}: {reason}")]
    InvalidValue {
        /// Layer being decoded.
        layer: &'static str,
        /// Field being decoded.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors that can occur in the buffering pipeline.
#[derive(Debug, Error)]
pub enum BufferError {
    /// An I/O error occurred on a sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot could not be decoded.
    #[error("corrupt snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    /// A path template could not be parsed.
    #[error("invalid path template: {0}")]
    Template(String),

    /// A stream identifier was rejected.
    #[error("invalid stream: {0}")]
    InvalidStream(String),
}

/// Result type alias for buffering operations.
pub type Result<T> = std::result::Result<T, BufferError>;
