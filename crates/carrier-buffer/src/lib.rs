//! # carrier-buffer
//!
//! Buffering, framing and crash recovery for log streams.
//!
//! This crate provides:
//!
//! - [`LineWriter`]: size-bounded buffer for uncompressed data
//! - [`FrameWriter`]: size-bounded buffer that never splits a frame
//! - [`ZstdWriter`]: streaming compressor with backup and restore
//! - [`RotatingFile`]: lazily opened log file, renamed away on rotation
//! - [`PathTemplate`] / [`StreamId`]: log file naming
//! - [`Notifier`]: rotation journal
//! - [`Bufferer`]: the composed pipelines, [`RawBufferer`] and [`ZstdBufferer`]
//! - [`StateEncoder`] / [`StateDecoder`]: the snapshot codec
//!
//! ## Example
//!
//! ```rust,no_run
//! use carrier_buffer::{Bufferer, FileSettings, PathTemplate, RawBufferer, RotatingFile, StreamId};
//!
//! # fn main() -> carrier_buffer::Result<()> {
//! let name = PathTemplate::parse("${dir}?/${name}")?;
//! let rotation = PathTemplate::parse("${dir}?/${name}-${time|%Y.%m.%d-%H}")?;
//! let settings = FileSettings::new("/var/log/carrier", name, rotation);
//! let id = StreamId::new("nginx", "access", "")?;
//! let file = RotatingFile::new(settings, id, &carrier_buffer::paths::now())?;
//!
//! let mut bufferer = RawBufferer::new(file, 128 * 1024);
//! bufferer.write(b"GET / 200\n")?;
//! bufferer.post_write()?;
//! bufferer.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bufferer;
pub mod codec;
pub mod compress;
pub mod error;
pub mod flush;
pub mod frame;
pub mod line;
pub mod notify;
pub mod paths;
pub mod rotating;

#[cfg(test)]
mod testing;

// Re-export main types
pub use bufferer::{Bufferer, BuffererKind, RawBufferer, ZstdBufferer};
pub use codec::{FieldKind, FieldSpec, FieldValue, LayerSchema, StateDecoder, StateEncoder, WalkedField, walk};
pub use compress::{DEFAULT_ZSTD_LEVEL, ZstdWriter};
pub use error::{BufferError, Result, SnapshotError};
pub use flush::FlushTracker;
pub use frame::{DEFAULT_FRAME_BUFFER_SIZE, FrameWriter};
pub use line::{DEFAULT_LINE_BUFFER_SIZE, LineWriter};
pub use notify::Notifier;
pub use paths::{PathTemplate, StreamId};
pub use rotating::{FileSettings, LinkSettings, RotatingFile};
