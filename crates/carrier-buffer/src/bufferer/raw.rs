//! Uncompressed pipeline.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};

use super::{Bufferer, BuffererKind};
use crate::codec::{StateDecoder, StateEncoder};
use crate::error::Result;
use crate::line::LineWriter;
use crate::paths::StreamId;
use crate::rotating::RotatingFile;

/// Line buffer over a rotating file.
#[derive(Debug)]
pub struct RawBufferer {
    line: LineWriter<RotatingFile>,
}

impl RawBufferer {
    /// Creates a pipeline buffering up to `bufsize` bytes in front of `file`.
    pub fn new(file: RotatingFile, bufsize: usize) -> Self {
        Self {
            line: LineWriter::with_capacity(bufsize, file),
        }
    }

    /// The file at the end of the pipeline.
    pub const fn file(&self) -> &RotatingFile {
        self.line.get_ref()
    }

    /// Bytes waiting in the line buffer.
    pub fn buffered(&self) -> &[u8] {
        self.line.buffered()
    }
}

impl Bufferer for RawBufferer {
    fn kind(&self) -> BuffererKind {
        BuffererKind::Raw
    }

    fn id(&self) -> &StreamId {
        self.line.get_ref().id()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.line.write(data)?)
    }

    fn post_write(&mut self) -> Result<()> {
        Ok(self.line.flush()?)
    }

    fn flush(&mut self) -> Result<()> {
        if self.line.worth_flushing() {
            self.line.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.line.flush()?;
        self.line.get_mut().close()?;
        Ok(())
    }

    fn rotate_file(&mut self, now: &DateTime<FixedOffset>) -> Result<Option<PathBuf>> {
        self.line.flush()?;
        self.line.get_mut().rotate_at(now)
    }

    fn dump_state(&self, enc: &mut StateEncoder) -> Result<()> {
        self.line.dump_state(enc)?;
        self.line.get_ref().dump_state(enc)?;
        Ok(())
    }

    fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<()> {
        let line = LineWriter::<RotatingFile>::decode_state(dec)?;
        let file = RotatingFile::decode_state(dec)?;
        self.line.apply_state(line);
        self.line.get_mut().apply_state(file);
        Ok(())
    }
}
