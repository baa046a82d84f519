//! Size-bounded buffer for uncompressed log data.
//!
//! [`LineWriter`] is the outermost layer of every bufferer: incoming bytes
//! collect here until the buffer would overflow or a flush is requested.

use std::io::{self, Write};

use crate::codec::{FieldKind, FieldSpec, LayerSchema, StateDecoder, StateEncoder};
use crate::error::SnapshotError;
use crate::flush::{BufferState, FlushTracker, TRACKER_FIELDS};

/// Default input buffer size.
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 128 * 1024;

/// Snapshot layout of a [`LineWriter`].
pub static LINE_SCHEMA: LayerSchema = LayerSchema {
    layer: "line",
    fields: &[
        FieldSpec::new("bufsize", FieldKind::U32),
        FieldSpec::new("buffer", FieldKind::Bytes),
        TRACKER_FIELDS[0],
        TRACKER_FIELDS[1],
        TRACKER_FIELDS[2],
        TRACKER_FIELDS[3],
        TRACKER_FIELDS[4],
    ],
};

/// Buffers writes for a downstream sink.
///
/// A write that would push the buffer past `bufsize` first flushes what is
/// buffered; a write larger than `bufsize` goes straight to the sink.
#[derive(Debug)]
pub struct LineWriter<W: Write> {
    inner: W,
    bufsize: usize,
    buffer: Vec<u8>,
    tracker: FlushTracker,
}

impl<W: Write> LineWriter<W> {
    /// Creates a writer with the default buffer size.
    pub fn new(inner: W) -> Self {
        Self::with_capacity(DEFAULT_LINE_BUFFER_SIZE, inner)
    }

    /// Creates a writer holding at most `bufsize` bytes.
    pub fn with_capacity(bufsize: usize, inner: W) -> Self {
        let bufsize = bufsize.max(1);
        Self {
            inner,
            bufsize,
            buffer: Vec::with_capacity(bufsize),
            tracker: FlushTracker::new(),
        }
    }

    /// Accepts `data`, buffering it or passing it through.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if !self.buffer.is_empty() && self.buffer.len() + data.len() > self.bufsize {
            self.flush()?;
        }
        if data.len() > self.bufsize {
            self.inner.write_all(data)?;
            return Ok(data.len());
        }
        self.buffer.extend_from_slice(data);
        self.tracker.record_insert();
        Ok(data.len())
    }

    /// Writes the buffered bytes downstream.
    ///
    /// On failure the buffer is kept intact so a later flush can retry.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.inner.write_all(&self.buffer) {
            self.tracker.record_flush_failure();
            return Err(e);
        }
        self.buffer.clear();
        self.tracker.record_flush();
        Ok(())
    }

    /// Answers whether a periodic flush should run now.
    pub fn worth_flushing(&mut self) -> bool {
        self.tracker.check()
    }

    /// Whether the buffer has grown past three quarters of its capacity.
    pub fn overgrown(&self) -> bool {
        self.buffer.len() >= self.high_water_mark()
    }

    fn high_water_mark(&self) -> usize {
        self.bufsize - self.bufsize / 4
    }

    /// Buffer capacity.
    pub const fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Shared access to the sink.
    pub const fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutable access to the sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Appends the `line` layer to `enc`.
    pub fn dump_state(&self, enc: &mut StateEncoder) -> Result<(), SnapshotError> {
        BufferState::dump(enc, &LINE_SCHEMA, self.bufsize, &self.buffer, &self.tracker)
    }

    pub(crate) fn decode_state(dec: &mut StateDecoder<'_>) -> Result<BufferState, SnapshotError> {
        BufferState::decode(dec, &LINE_SCHEMA)
    }

    pub(crate) fn apply_state(&mut self, state: BufferState) {
        self.bufsize = state.bufsize;
        self.buffer = state.buffer;
        self.tracker = state.tracker;
    }

    /// Replaces the writer state with the `line` layer read from `dec`.
    pub fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<(), SnapshotError> {
        let state = Self::decode_state(dec)?;
        self.apply_state(state);
        Ok(())
    }
}
