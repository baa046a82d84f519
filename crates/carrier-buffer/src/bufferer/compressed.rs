//! Zstandard-compressed pipeline.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};

use super::{Bufferer, BuffererKind};
use crate::codec::{StateDecoder, StateEncoder};
use crate::compress::ZstdWriter;
use crate::error::Result;
use crate::frame::FrameWriter;
use crate::line::LineWriter;
use crate::paths::StreamId;
use crate::rotating::RotatingFile;

type Pipeline = LineWriter<ZstdWriter<FrameWriter<RotatingFile>>>;

/// Line buffer, compressor and frame buffer over a rotating file.
///
/// Frame buffer flushes may leave an unfinished zstd frame on disk. Only
/// [`close`](Bufferer::close), rotation and sealing flush ticks end the file
/// on a frame boundary, so only then is it fully decodable.
#[derive(Debug)]
pub struct ZstdBufferer {
    line: Pipeline,
}

impl ZstdBufferer {
    /// Creates a pipeline in front of `file`.
    ///
    /// `input` bounds the uncompressed line buffer, `framing` the buffer of
    /// compressed frames.
    pub fn new(file: RotatingFile, input: usize, framing: usize, level: i32) -> io::Result<Self> {
        let frame = FrameWriter::with_capacity(framing, file);
        let zstd = ZstdWriter::new(frame, level)?;
        Ok(Self {
            line: LineWriter::with_capacity(input, zstd),
        })
    }

    fn zstd(&mut self) -> &mut ZstdWriter<FrameWriter<RotatingFile>> {
        self.line.get_mut()
    }

    fn frame(&mut self) -> &mut FrameWriter<RotatingFile> {
        self.line.get_mut().get_mut()
    }

    fn file(&mut self) -> &mut RotatingFile {
        self.line.get_mut().get_mut().get_mut()
    }

    /// Finishes the current zstd frame and writes every buffered frame.
    fn seal(&mut self) -> io::Result<()> {
        let zstd = self.zstd();
        zstd.close()?;
        zstd.reset()?;
        self.frame().flush_buffer()
    }

    /// Ends the open zstd frame once its journal reaches the framing size.
    /// The epilogue stays in the frame buffer.
    fn bound_frame(&mut self) -> io::Result<()> {
        let limit = self.frame().bufsize();
        let zstd = self.zstd();
        if zstd.journal_len() >= limit {
            zstd.close()?;
            zstd.reset()?;
        }
        Ok(())
    }

    /// The file at the end of the pipeline.
    pub const fn file_ref(&self) -> &RotatingFile {
        self.line.get_ref().get_ref().get_ref()
    }

    /// Uncompressed bytes waiting in the line buffer.
    pub fn buffered(&self) -> &[u8] {
        self.line.buffered()
    }
}

impl Bufferer for ZstdBufferer {
    fn kind(&self) -> BuffererKind {
        BuffererKind::Zstd
    }

    fn id(&self) -> &StreamId {
        self.file_ref().id()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.line.write(data)?)
    }

    fn post_write(&mut self) -> Result<()> {
        if self.line.overgrown() {
            self.line.flush()?;
        }
        self.bound_frame()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.line.worth_flushing() {
            self.line.flush()?;
        }
        self.bound_frame()?;
        if self.frame().worth_flushing() {
            self.seal()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.line.flush()?;
        self.seal()?;
        self.file().close()?;
        Ok(())
    }

    fn rotate_file(&mut self, now: &DateTime<FixedOffset>) -> Result<Option<PathBuf>> {
        self.line.flush()?;
        self.seal()?;
        self.file().rotate_at(now)
    }

    fn dump_state(&self, enc: &mut StateEncoder) -> Result<()> {
        let zstd = self.line.get_ref();
        let frame = zstd.get_ref();
        self.line.dump_state(enc)?;
        zstd.backup(enc)?;
        frame.dump_state(enc)?;
        frame.get_ref().dump_state(enc)?;
        Ok(())
    }

    fn restore_state(&mut self, dec: &mut StateDecoder<'_>) -> Result<()> {
        let line = Pipeline::decode_state(dec)?;
        let zstd = ZstdWriter::<FrameWriter<RotatingFile>>::decode_state(dec)?;
        let frame = FrameWriter::<RotatingFile>::decode_state(dec)?;
        let file = RotatingFile::decode_state(dec)?;

        // Replaying the compressor is the only step that can fail.
        self.zstd().apply_state(zstd)?;
        self.line.apply_state(line);
        self.frame().apply_state(frame);
        self.file().apply_state(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::walk;
    use crate::paths::PathTemplate;
    use crate::rotating::FileSettings;
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;

    fn hour(h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .and_then(|tz| tz.with_ymd_and_hms(2024, 5, 1, h, 0, 0).single())
            .expect("valid time")
    }

    fn bufferer(root: &Path, input: usize, framing: usize) -> ZstdBufferer {
        let settings = FileSettings::new(
            root,
            PathTemplate::parse("${name}.zst").expect("template"),
            PathTemplate::parse("${name}-${time|%H}.zst").expect("template"),
        );
        let id = StreamId::new("", "app", "").expect("id");
        let file = RotatingFile::new(settings, id, &hour(1)).expect("file");
        ZstdBufferer::new(file, input, framing, 3).expect("bufferer")
    }

    fn decompress(path: &Path) -> Vec<u8> {
        let data = fs::read(path).expect("read");
        zstd::stream::decode_all(data.as_slice()).expect("whole frames")
    }

    #[test]
    fn close_leaves_decodable_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut b = bufferer(tmp.path(), 64, 256);
        for i in 0..50 {
            b.write(format!("line {i}\n").as_bytes()).expect("write");
            b.post_write().expect("post_write");
        }
        b.close().expect("close");

        let expected: String = (0..50).map(|i| format!("line {i}\n")).collect();
        assert_eq!(decompress(&tmp.path().join("app.zst")), expected.as_bytes());
    }

    #[test]
    fn post_write_waits_for_high_water_mark() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut b = bufferer(tmp.path(), 16, 1024);
        b.write(b"0123456789").expect("write");
        b.post_write().expect("post_write");
        assert_eq!(b.buffered(), b"0123456789");

        b.write(b"ab").expect("write");
        b.post_write().expect("post_write");
        assert!(b.buffered().is_empty());
    }

    #[test]
    fn periodic_flush_writes_whole_frames() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("app.zst");
        let mut b = bufferer(tmp.path(), 1024, 4096);
        b.write(b"first\n").expect("write");
        b.flush().expect("flush");
        assert_eq!(decompress(&path), b"first\n");

        // Each layer skips the tick right after it flushed.
        b.write(b"second\n").expect("write");
        for _ in 0..3 {
            b.flush().expect("flush");
        }
        assert_eq!(decompress(&path), b"first\nsecond\n");
    }

    #[test]
    fn sustained_traffic_keeps_journal_bounded() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (input, framing) = (256, 512);
        let mut b = bufferer(tmp.path(), input, framing);
        let mut expected = Vec::new();
        for round in 0..20 {
            for i in 0..200 {
                let line = format!("round {round} line {i}\n");
                b.write(line.as_bytes()).expect("write");
                b.post_write().expect("post_write");
                expected.extend_from_slice(line.as_bytes());
            }
            b.flush().expect("flush");
            let journal = b.line.get_ref().journal_len();
            assert!(journal < framing + 2 * input, "round {round}: journal holds {journal} bytes");
        }
        b.close().expect("close");
        assert_eq!(decompress(&tmp.path().join("app.zst")), expected);
    }

    #[test]
    fn rotation_seals_old_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut b = bufferer(tmp.path(), 1024, 4096);
        b.write(b"old hour\n").expect("write");
        let rotated = b.rotate_file(&hour(2)).expect("rotate");
        assert_eq!(rotated, Some(tmp.path().join("app-02.zst")));

        b.write(b"new hour\n").expect("write");
        b.close().expect("close");
        assert_eq!(decompress(&tmp.path().join("app-02.zst")), b"old hour\n");
        assert_eq!(decompress(&tmp.path().join("app.zst")), b"new hour\n");
    }

    #[test]
    fn dump_matches_declared_layers() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut b = bufferer(tmp.path(), 1024, 4096);
        b.write(b"pending\n").expect("write");
        b.line.flush().expect("into compressor");

        let mut enc = StateEncoder::new();
        b.dump_state(&mut enc).expect("dump");
        let blob = enc.into_bytes();
        let mut dec = StateDecoder::new(&blob);
        let fields = walk(&mut dec, BuffererKind::Zstd.layers()).expect("walk");
        dec.finish().expect("no trailing bytes");

        let declared: usize = BuffererKind::Zstd.layers().iter().map(|l| l.fields.len()).sum();
        assert_eq!(fields.len(), declared);
    }
}
