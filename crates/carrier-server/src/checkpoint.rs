//! Checkpoint file.
//!
//! Written at shutdown and restored at startup so buffered data survives a
//! restart. Layout, after the 4-byte magic `LCST`:
//!
//! ```text
//! checkpoint: version u32, streams u32
//! stream * streams: kind u32, dir bytes, name bytes, group bytes, state bytes
//! ```
//!
//! Every record uses the snapshot codec of `carrier-buffer`; `state` is the
//! blob produced by [`Bufferer::dump_state`].

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use carrier_buffer::codec::{FieldKind, FieldSpec, FieldValue, LayerSchema, StateDecoder, StateEncoder, walk};
use bytes::{BufMut, BytesMut};
use carrier_buffer::{Bufferer, BuffererKind, SnapshotError, StreamId};
use tracing::debug;

use crate::error::Result;
use crate::registry::Registry;

/// Leading bytes of every checkpoint file.
pub const MAGIC: &[u8; 4] = b"LCST";

/// Current format version.
pub const VERSION: u32 = 1;

/// Bytes of a field shown by [`inspect`] before eliding.
const PREVIEW_LEN: usize = 48;

static HEADER_SCHEMA: LayerSchema = LayerSchema {
    layer: "checkpoint",
    fields: &[
        FieldSpec::new("version", FieldKind::U32),
        FieldSpec::new("streams", FieldKind::U32),
    ],
};

static STREAM_SCHEMA: LayerSchema = LayerSchema {
    layer: "stream",
    fields: &[
        FieldSpec::new("kind", FieldKind::U32),
        FieldSpec::new("dir", FieldKind::Bytes),
        FieldSpec::new("name", FieldKind::Bytes),
        FieldSpec::new("group", FieldKind::Bytes),
        FieldSpec::new("state", FieldKind::Bytes),
    ],
};

/// The saved state of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Pipeline variant the state belongs to.
    pub kind: BuffererKind,
    /// Stream identifier.
    pub id: StreamId,
    /// Snapshot of every layer of the pipeline.
    pub state: Vec<u8>,
}

impl StreamEntry {
    /// Captures the state of a bufferer.
    pub fn capture(bufferer: &dyn Bufferer) -> Result<Self> {
        let mut enc = StateEncoder::new();
        bufferer.dump_state(&mut enc)?;
        Ok(Self {
            kind: bufferer.kind(),
            id: bufferer.id().clone(),
            state: enc.into_bytes(),
        })
    }
}

/// Saved state of every stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// One entry per stream, sorted by identifier.
    pub streams: Vec<StreamEntry>,
}

impl Checkpoint {
    /// Captures every stream of `registry`, locking each in turn.
    pub fn capture(registry: &Registry) -> Result<Self> {
        let mut streams = Vec::with_capacity(registry.len());
        for (_, bufferer) in registry.streams() {
            let bufferer = bufferer.lock();
            streams.push(StreamEntry::capture(bufferer.as_ref())?);
        }
        Ok(Self { streams })
    }

    /// Serializes the checkpoint.
    pub fn encode(&self) -> std::result::Result<Vec<u8>, SnapshotError> {
        let mut enc = StateEncoder::new();
        let mut header = enc.layer(&HEADER_SCHEMA);
        header.u32("version", VERSION)?;
        header.u32("streams", stream_count(self.streams.len())?)?;
        header.finish()?;

        for entry in &self.streams {
            let mut layer = enc.layer(&STREAM_SCHEMA);
            layer.u32("kind", entry.kind.tag())?;
            layer.bytes("dir", entry.id.dir().as_bytes())?;
            layer.bytes("name", entry.id.name().as_bytes())?;
            layer.bytes("group", entry.id.group().as_bytes())?;
            layer.bytes("state", &entry.state)?;
            layer.finish()?;
        }

        let body = enc.as_bytes();
        let mut out = BytesMut::with_capacity(MAGIC.len() + body.len());
        out.put_slice(MAGIC);
        out.put_slice(body);
        Ok(out.into())
    }

    /// Parses a checkpoint. Stream states are not interpreted.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, SnapshotError> {
        let body = data.strip_prefix(MAGIC.as_slice()).ok_or(SnapshotError::BadMagic)?;
        let mut dec = StateDecoder::new(body);

        let mut header = dec.layer(&HEADER_SCHEMA)?;
        let version = header.u32("version")?;
        if version != VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let count = header.u32("streams")?;
        header.finish()?;

        let mut streams = Vec::new();
        for _ in 0..count {
            let mut layer = dec.layer(&STREAM_SCHEMA)?;
            let kind = BuffererKind::from_tag(layer.u32("kind")?)?;
            let dir = layer.string("dir")?;
            let name = layer.string("name")?;
            let group = layer.string("group")?;
            let state = layer.bytes("state")?.to_vec();
            layer.finish()?;

            let id = StreamId::new(dir, name, group).map_err(|e| SnapshotError::InvalidValue {
                layer: STREAM_SCHEMA.layer,
                field: "name",
                reason: e.to_string(),
            })?;
            streams.push(StreamEntry { kind, id, state });
        }
        dec.finish()?;
        Ok(Self { streams })
    }

    /// Writes the checkpoint to a temporary file, then renames it over `path`.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let data = self.encode()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), streams = self.streams.len(), bytes = data.len(), "wrote checkpoint");
        Ok(())
    }

    /// Reads a checkpoint, or `None` when `path` does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Self::decode(&data)?))
    }
}

fn stream_count(len: usize) -> std::result::Result<u32, SnapshotError> {
    u32::try_from(len).map_err(|_| SnapshotError::InvalidValue {
        layer: HEADER_SCHEMA.layer,
        field: "streams",
        reason: format!("{len} streams do not fit a u32 count"),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Renders a checkpoint as text, decoding every layer of every stream.
pub fn inspect(checkpoint: &Checkpoint) -> std::result::Result<String, SnapshotError> {
    let mut out = String::new();
    let _ = writeln!(out, "checkpoint version {VERSION}, {} streams", checkpoint.streams.len());
    for entry in &checkpoint.streams {
        let _ = writeln!(out, "stream {} ({})", entry.id, entry.kind);
        let mut dec = StateDecoder::new(&entry.state);
        let fields = walk(&mut dec, entry.kind.layers())?;
        dec.finish()?;
        for field in fields {
            let _ = writeln!(out, "  {}.{} = {}", field.layer, field.field, render_value(&field.value));
        }
    }
    Ok(out)
}

fn render_value(value: &FieldValue<'_>) -> String {
    match value {
        FieldValue::U32(n) => n.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Bytes(bytes) => {
            let shown = &bytes[..bytes.len().min(PREVIEW_LEN)];
            let ellipsis = if bytes.len() > PREVIEW_LEN { "..." } else { "" };
            format!("[{} bytes] \"{}\"{ellipsis}", bytes.len(), shown.escape_ascii())
        }
    }
}
