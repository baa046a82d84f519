//! Buffered writer that keeps compression frames whole.
//!
//! Decompressors consume a stream split into frames, and a frame must reach
//! the file as one piece to be decodable. [`FrameWriter`] therefore treats
//! every write as an indivisible frame: the buffer is only ever flushed at a
//! frame boundary.

use std::io::{self, Write};

use crate::codec::{FieldKind, FieldSpec, LayerSchema, StateDecoder, StateEncoder};
use crate::error::SnapshotError;
use crate::flush::{BufferState, FlushTracker, TRACKER_FIELDS};

/// Default framing buffer size.
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 256 * 1024;

/// Snapshot layout of a [`FrameWriter`].
pub static FRAME_SCHEMA: LayerSchema = LayerSchema {
    layer: "frame",
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

/// A size-bounded buffer that only splits data at frame bounds.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
    bufsize: usize,
    buffer: Vec<u8>,
    tracker: FlushTracker,
}

impl<W: Write> FrameWriter<W> {
    /// Creates a writer with the default buffer size.
    pub fn new(inner: W) -> Self {
        Self::with_capacity(DEFAULT_FRAME_BUFFER_SIZE, inner)
    }

    /// Creates a writer holding at most `bufsize` bytes of whole frames.
    pub fn with_capacity(bufsize: usize, inner: W) -> Self {
        let bufsize = bufsize.max(1);
        Self {
            inner,
            bufsize,
            buffer: Vec::with_capacity(bufsize),
            tracker: FlushTracker::new(),
        }
    }

    /// Accepts one frame.
    ///
    /// If the frame does not fit next to what is buffered, the buffer is
    /// flushed first and the next periodic check is disarmed. A frame larger
    /// than the whole buffer is written straight to the sink.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.is_empty() {
            return Ok(());
        }
        if !self.buffer.is_empty() && self.buffer.len() + frame.len() > self.bufsize {
            self.tracker.disarm();
            self.flush_buffer()?;
        }
        if frame.len() > self.bufsize {
            return self.inner.write_all(frame);
        }
        self.buffer.extend_from_slice(frame);
        self.tracker.record_insert();
        Ok(())
    }

    /// Writes all buffered frames to the sink in a single write.
    pub fn flush_buffer(&mut self) -> io::Result<()> {
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

    /// Buffer capacity.
    pub const fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Frames currently buffered, concatenated.
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

    /// Appends the `frame` layer to `enc`.
    pub fn dump_state(&self, enc: &mut StateEncoder) -> Result<(), SnapshotError> {
        BufferState::dump(enc, &FRAME_SCHEMA, self.bufsize, &self.buffer, &self.tracker)
    }

    pub(crate) fn decode_state(dec: &mut StateDecoder<'_>) -> Result<BufferState, SnapshotError> {
        BufferState::decode(dec, &FRAME_SCHEMA)
    }

    pub(crate) fn apply_state(&mut self, state: BufferState) {
        self.bufsize = state.bufsize;
        self.buffer = state.buffer;
        self.tracker = state.tracker;
    }

    /// Replaces the writer state with the `frame` layer read from `dec`.
    pub fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<(), SnapshotError> {
        let state = Self::decode_state(dec)?;
        self.apply_state(state);
        Ok(())
    }
}

/// Each `write` call is one frame; it is accepted whole or not at all.
impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_frame(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.inner.flush()
    }
}
