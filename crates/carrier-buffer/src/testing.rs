//! Sinks used by unit tests.

use std::io::{self, Write};

/// Records every write call as a separate entry.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub writes: Vec<Vec<u8>>,
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Accumulates bytes, failing every write while `fail` is set.
#[derive(Debug, Default)]
pub struct FailingSink {
    pub fail: bool,
    pub data: Vec<u8>,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "sink is full"));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
