//! Bufferers: complete pipelines from incoming bytes to a rotating file.
//!
//! This module provides the [`Bufferer`] trait and its two implementations:
//!
//! - [`RawBufferer`]: line buffer directly over the file
//! - [`ZstdBufferer`]: line buffer, zstd compressor and frame buffer over
//!   the file
//!
//! Bufferers are not synchronized; callers serialize access per stream.

mod compressed;
mod raw;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use tracing::warn;

use crate::codec::{LayerSchema, StateDecoder, StateEncoder};
use crate::compress::ZSTD_SCHEMA;
use crate::error::{Result, SnapshotError};
use crate::frame::FRAME_SCHEMA;
use crate::line::LINE_SCHEMA;
use crate::notify::Notifier;
use crate::paths::{self, StreamId};
use crate::rotating::FILE_SCHEMA;

pub use compressed::ZstdBufferer;
pub use raw::RawBufferer;

/// Pipeline variant, persisted as a tag in front of every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuffererKind {
    /// Uncompressed output.
    Raw,
    /// Zstandard-compressed output.
    Zstd,
}

impl BuffererKind {
    /// Wire tag.
    pub const fn tag(self) -> u32 {
        match self {
            Self::Raw => 0,
            Self::Zstd => 1,
        }
    }

    /// Parses a wire tag.
    pub fn from_tag(tag: u32) -> std::result::Result<Self, SnapshotError> {
        match tag {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Zstd),
            other => Err(SnapshotError::UnknownKind(other)),
        }
    }

    /// Snapshot layers of this variant, outermost first.
    pub fn layers(self) -> &'static [&'static LayerSchema] {
        static RAW: [&LayerSchema; 2] = [&LINE_SCHEMA, &FILE_SCHEMA];
        static ZSTD: [&LayerSchema; 4] = [&LINE_SCHEMA, &ZSTD_SCHEMA, &FRAME_SCHEMA, &FILE_SCHEMA];
        match self {
            Self::Raw => &RAW,
            Self::Zstd => &ZSTD,
        }
    }
}

impl fmt::Display for BuffererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Zstd => f.write_str("zstd"),
        }
    }
}

/// A buffering pipeline bound to one stream.
pub trait Bufferer: Send {
    /// Variant of this pipeline.
    fn kind(&self) -> BuffererKind;

    /// Stream the pipeline writes.
    fn id(&self) -> &StreamId;

    /// Accepts incoming bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if an overflow flush fails; nothing is accepted then.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Hook run after each ingested record.
    fn post_write(&mut self) -> Result<()>;

    /// Periodic flush; only performs I/O when a layer reports it is worth it.
    fn flush(&mut self) -> Result<()>;

    /// Pushes all buffered data into the file and releases the handle.
    fn close(&mut self) -> Result<()>;

    /// Flushes everything into the current file, then rotates it as of `now`.
    ///
    /// Returns the path the rotated file was renamed to, or `None` when the
    /// file received no data since the last rotation.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing, renaming or opening the new file fails.
    /// The old file then remains the active sink.
    fn rotate_file(&mut self, now: &DateTime<FixedOffset>) -> Result<Option<PathBuf>>;

    /// Rotates at the current time and reports the rotated path to `notifier`.
    ///
    /// A failing notifier is logged; the rotation stands.
    fn rotate(&mut self, notifier: &Notifier) -> Result<Option<PathBuf>> {
        let rotated = self.rotate_file(&paths::now())?;
        if let Some(path) = &rotated {
            if let Err(e) = notifier.notify(path) {
                warn!(
                    stream = %self.id(),
                    path = %path.display(),
                    notifier = notifier.kind(),
                    error = %e,
                    "rotation notification failed"
                );
            }
        }
        Ok(rotated)
    }

    /// Appends the snapshot of every layer to `enc`, outermost first.
    fn dump_state(&self, enc: &mut StateEncoder) -> Result<()>;

    /// Replaces the pipeline state with a snapshot read from `dec`.
    ///
    /// All layers are decoded before any is applied, so a corrupt snapshot
    /// leaves the pipeline untouched.
    fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<()>;
}

impl fmt::Debug for dyn Bufferer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bufferer")
            .field("kind", &self.kind())
            .field("stream", self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(BuffererKind::Raw, 0 ; "raw")]
    #[test_case(BuffererKind::Zstd, 1 ; "zstd")]
    fn tags_round_trip(kind: BuffererKind, tag: u32) {
        assert_eq!(kind.tag(), tag);
        assert_eq!(BuffererKind::from_tag(tag), Ok(kind));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(BuffererKind::from_tag(7), Err(SnapshotError::UnknownKind(7)));
    }

    #[test]
    fn layer_order_is_outermost_first() {
        let names: Vec<_> = BuffererKind::Zstd.layers().iter().map(|l| l.layer).collect();
        assert_eq!(names, ["line", "zstd", "frame", "file"]);
        let names: Vec<_> = BuffererKind::Raw.layers().iter().map(|l| l.layer).collect();
        assert_eq!(names, ["line", "file"]);
    }
}
