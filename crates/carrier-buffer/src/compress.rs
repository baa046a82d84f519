//! Zstandard adapter between the line buffer and the frame buffer.
//!
//! [`ZstdWriter`] compresses everything written to it into one zstd frame
//! until [`ZstdWriter::close`] finalizes that frame. Every accepted write is
//! compressed and flushed through the encoder at once; the compressed output
//! of one write reaches the downstream sink as one piece.
//!
//! The encoder context itself can not be serialized. Instead the writer
//! keeps the uncompressed chunks of the open frame; [`ZstdWriter::restore_state`]
//! replays them into a fresh encoder, discarding the output that was already
//! delivered, which leaves the encoder exactly where it was.

use std::fmt;
use std::io::{self, Write};

use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;
use zstd::stream::write::Encoder;

use crate::codec::{FieldKind, FieldSpec, LayerSchema, StateDecoder, StateEncoder};
use crate::error::{Result, SnapshotError};

/// Compression level used when none is configured.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Snapshot layout of a [`ZstdWriter`].
pub static ZSTD_SCHEMA: LayerSchema = LayerSchema {
    layer: "zstd",
    fields: &[
        FieldSpec::new("level", FieldKind::U32),
        FieldSpec::new("open", FieldKind::Bool),
        FieldSpec::new("journal", FieldKind::Bytes),
        FieldSpec::new("chunks", FieldKind::Bytes),
        FieldSpec::new("pending", FieldKind::Bytes),
    ],
};

/// Streaming zstd compressor with frame-level close/reset and state backup.
pub struct ZstdWriter<W: Write> {
    inner: W,
    level: i32,
    encoder: Option<Encoder<'static, Vec<u8>>>,
    /// Uncompressed input of the open frame.
    journal: Vec<u8>,
    /// Sizes of the writes that make up `journal`.
    chunks: Vec<u32>,
    /// Compressed output not yet accepted downstream.
    pending: Vec<u8>,
}

/// Decoded `zstd` layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ZstdState {
    level: i32,
    open: bool,
    journal: Vec<u8>,
    chunks: Vec<u32>,
    pending: Vec<u8>,
}

impl<W: Write> ZstdWriter<W> {
    /// Creates a compressor writing frames into `inner`.
    pub fn new(inner: W, level: i32) -> io::Result<Self> {
        Ok(Self {
            inner,
            level,
            encoder: Some(Self::fresh_encoder(level)?),
            journal: Vec::new(),
            chunks: Vec::new(),
            pending: Vec::new(),
        })
    }

    fn fresh_encoder(level: i32) -> io::Result<Encoder<'static, Vec<u8>>> {
        Encoder::new(Vec::new(), level)
    }

    /// Compresses `data` into the open frame and forwards the output.
    ///
    /// Output that the sink refuses stays pending and is retried first by
    /// the next write or close; the data itself counts as accepted.
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.forward()?;
        let size = u32::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk larger than 4 GiB"))?;

        if self.encoder.is_none() {
            // Closed without reset after a failed delivery: start the next frame.
            self.encoder = Some(Self::fresh_encoder(self.level)?);
            self.journal.clear();
            self.chunks.clear();
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("zstd encoder unavailable"))?;
        encoder.write_all(data)?;
        encoder.flush()?;
        self.pending.append(encoder.get_mut());
        self.journal.extend_from_slice(data);
        self.chunks.push(size);

        if let Err(e) = self.forward() {
            warn!(error = %e, pending = self.pending.len(), "compressed output deferred");
        }
        Ok(data.len())
    }

    /// Finalizes the open frame and forwards its epilogue downstream.
    ///
    /// A frame that never received input produces no output.
    pub fn close(&mut self) -> io::Result<()> {
        self.forward()?;
        if let Some(encoder) = self.encoder.take() {
            let mut tail = encoder.finish()?;
            if !self.chunks.is_empty() {
                self.pending.append(&mut tail);
            }
            self.journal.clear();
            self.chunks.clear();
        }
        self.forward()
    }

    /// Prepares a new frame after [`close`](Self::close).
    pub fn reset(&mut self) -> io::Result<()> {
        if self.encoder.is_some() && !self.chunks.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "reset would discard an unfinished frame",
            ));
        }
        self.encoder = Some(Self::fresh_encoder(self.level)?);
        self.journal.clear();
        self.chunks.clear();
        Ok(())
    }

    fn forward(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&self.pending)?;
        self.pending.clear();
        Ok(())
    }

    /// Whether a frame is open for writing.
    pub const fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    /// Compressed bytes waiting for the sink to accept them.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Uncompressed bytes in the open frame, replayed on restore.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Compression level.
    pub const fn level(&self) -> i32 {
        self.level
    }

    /// Shared access to the sink.
    pub const fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutable access to the sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Appends the `zstd` layer to `enc`.
    pub fn backup(&self, enc: &mut StateEncoder) -> std::result::Result<(), SnapshotError> {
        let mut layer = enc.layer(&ZSTD_SCHEMA);
        layer.u32("level", self.level as u32)?;
        layer.bool("open", self.encoder.is_some())?;
        layer.bytes("journal", &self.journal)?;
        let mut chunks = BytesMut::with_capacity(self.chunks.len() * 4);
        for &size in &self.chunks {
            chunks.put_u32(size);
        }
        layer.bytes("chunks", &chunks)?;
        layer.bytes("pending", &self.pending)?;
        layer.finish()
    }

    pub(crate) fn decode_state(dec: &mut StateDecoder<'_>) -> std::result::Result<ZstdState, SnapshotError> {
        let mut layer = dec.layer(&ZSTD_SCHEMA)?;
        let level = layer.u32("level")? as i32;
        let open = layer.bool("open")?;
        let journal = layer.bytes("journal")?.to_vec();
        let mut raw_chunks = layer.bytes("chunks")?;
        let pending = layer.bytes("pending")?.to_vec();
        layer.finish()?;

        let invalid = |reason: &str| SnapshotError::InvalidValue {
            layer: ZSTD_SCHEMA.layer,
            field: "chunks",
            reason: reason.to_string(),
        };
        if raw_chunks.len() % 4 != 0 {
            return Err(invalid("length is not a multiple of 4"));
        }
        let mut chunks = Vec::with_capacity(raw_chunks.len() / 4);
        while raw_chunks.has_remaining() {
            chunks.push(raw_chunks.get_u32());
        }
        let total: u64 = chunks.iter().map(|&c| u64::from(c)).sum();
        if total != journal.len() as u64 {
            return Err(invalid("chunk sizes do not add up to the journal"));
        }
        if !open && !chunks.is_empty() {
            return Err(invalid("closed frame with journaled input"));
        }
        Ok(ZstdState {
            level,
            open,
            journal,
            chunks,
            pending,
        })
    }

    pub(crate) fn apply_state(&mut self, state: ZstdState) -> io::Result<()> {
        let encoder = if state.open {
            let mut encoder = Self::fresh_encoder(state.level)?;
            let mut offset = 0;
            for &size in &state.chunks {
                let end = offset + size as usize;
                encoder.write_all(&state.journal[offset..end])?;
                encoder.flush()?;
                encoder.get_mut().clear();
                offset = end;
            }
            Some(encoder)
        } else {
            None
        };
        self.level = state.level;
        self.encoder = encoder;
        self.journal = state.journal;
        self.chunks = state.chunks;
        self.pending = state.pending;
        Ok(())
    }

    /// Replaces the compressor state with the `zstd` layer read from `dec`.
    pub fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<()> {
        let state = Self::decode_state(dec)?;
        self.apply_state(state)?;
        Ok(())
    }
}

impl<W: Write> Write for ZstdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.forward()?;
        self.inner.flush()
    }
}

impl<W: Write + fmt::Debug> fmt::Debug for ZstdWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZstdWriter")
            .field("inner", &self.inner)
            .field("level", &self.level)
            .field("open", &self.encoder.is_some())
            .field("journal_len", &self.journal.len())
            .field("chunks", &self.chunks.len())
            .field("pending_len", &self.pending.len())
            .finish()
    }
}
