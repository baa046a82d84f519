//! Binary snapshot encoding.
//!
//! A snapshot is a sequence of layers. Every layer starts with its field
//! count (big-endian `u32`) followed by the fields in schema order:
//!
//! - `u32`: 4 bytes, big-endian
//! - `bool`: 1 byte, `0` or `1`
//! - `bytes`: `u32` length followed by the raw bytes
//!
//! Both [`StateEncoder`] and [`StateDecoder`] are driven by the same
//! [`LayerSchema`], so a field written out of order is rejected on the way
//! in and a truncated or reordered blob is rejected on the way out.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::SnapshotError;

/// Wire type of a snapshot field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Fixed-width unsigned 32-bit integer.
    U32,
    /// Single byte boolean.
    Bool,
    /// Length-prefixed byte string.
    Bytes,
}

/// A named, typed field of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, used in error messages and by `inspect`.
    pub name: &'static str,
    /// Wire type.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Declares a field.
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// The ordered field list of one pipeline layer.
#[derive(Debug, PartialEq, Eq)]
pub struct LayerSchema {
    /// Layer name.
    pub layer: &'static str,
    /// Fields in wire order.
    pub fields: &'static [FieldSpec],
}

impl LayerSchema {
    fn field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    fn check(&self, index: usize, field: &'static str, kind: FieldKind) -> Result<(), SnapshotError> {
        match self.fields.get(index) {
            Some(spec) if spec.name == field && spec.kind == kind => Ok(()),
            _ => Err(SnapshotError::SchemaMismatch {
                layer: self.layer,
                field,
            }),
        }
    }
}

/// A decoded field value, as produced by [`LayerDecoder::value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Integer field.
    U32(u32),
    /// Boolean field.
    Bool(bool),
    /// Byte string field.
    Bytes(&'a [u8]),
}

// ============================================================================
// Encoding
// ============================================================================

/// Accumulates layers into one contiguous snapshot blob.
#[derive(Debug, Default)]
pub struct StateEncoder {
    buf: BytesMut,
}

impl StateEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a layer, writing its field count.
    pub fn layer(&mut self, schema: &'static LayerSchema) -> LayerEncoder<'_> {
        self.buf.put_u32(schema.field_count());
        LayerEncoder {
            enc: self,
            schema,
            next: 0,
        }
    }

    /// Returns the bytes encoded so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder and returns the blob.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into()
    }
}

/// Writes the fields of a single layer, in schema order.
#[derive(Debug)]
pub struct LayerEncoder<'a> {
    enc: &'a mut StateEncoder,
    schema: &'static LayerSchema,
    next: usize,
}

impl LayerEncoder<'_> {
    /// Writes a `u32` field.
    pub fn u32(&mut self, field: &'static str, value: u32) -> Result<(), SnapshotError> {
        self.schema.check(self.next, field, FieldKind::U32)?;
        self.enc.buf.put_u32(value);
        self.next += 1;
        Ok(())
    }

    /// Writes a boolean field.
    pub fn bool(&mut self, field: &'static str, value: bool) -> Result<(), SnapshotError> {
        self.schema.check(self.next, field, FieldKind::Bool)?;
        self.enc.buf.put_u8(u8::from(value));
        self.next += 1;
        Ok(())
    }

    /// Writes a length-prefixed byte string field.
    pub fn bytes(&mut self, field: &'static str, value: &[u8]) -> Result<(), SnapshotError> {
        self.schema.check(self.next, field, FieldKind::Bytes)?;
        let len = u32::try_from(value.len()).map_err(|_| SnapshotError::InvalidValue {
            layer: self.schema.layer,
            field,
            reason: format!("{} bytes do not fit a u32 length prefix", value.len()),
        })?;
        self.enc.buf.put_u32(len);
        self.enc.buf.put_slice(value);
        self.next += 1;
        Ok(())
    }

    /// Ends the layer, checking every schema field was written.
    pub fn finish(self) -> Result<(), SnapshotError> {
        if self.next == self.schema.fields.len() {
            return Ok(());
        }
        Err(SnapshotError::SchemaMismatch {
            layer: self.schema.layer,
            field: self.schema.fields[self.next].name,
        })
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads layers back out of a snapshot blob.
///
/// Byte string fields borrow from the blob instead of being copied.
#[derive(Debug)]
pub struct StateDecoder<'a> {
    rest: &'a [u8],
}

impl<'a> StateDecoder<'a> {
    /// Creates a decoder over `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }

    /// Number of bytes not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rest.remaining()
    }

    /// Starts decoding a layer, validating its field count.
    pub fn layer(&mut self, schema: &'static LayerSchema) -> Result<LayerDecoder<'_, 'a>, SnapshotError> {
        let found = self.get_u32(schema.layer, "<fields>")?;
        if found != schema.field_count() {
            return Err(SnapshotError::FieldCount {
                layer: schema.layer,
                expected: schema.field_count(),
                found,
            });
        }
        Ok(LayerDecoder {
            dec: self,
            schema,
            next: 0,
        })
    }

    /// Checks the blob was consumed entirely.
    pub fn finish(self) -> Result<(), SnapshotError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(SnapshotError::TrailingBytes(n)),
        }
    }

    fn need(&self, n: usize, layer: &'static str, field: &'static str) -> Result<(), SnapshotError> {
        if self.rest.remaining() < n {
            return Err(SnapshotError::Truncated { layer, field });
        }
        Ok(())
    }

    fn get_u32(&mut self, layer: &'static str, field: &'static str) -> Result<u32, SnapshotError> {
        self.need(4, layer, field)?;
        Ok(self.rest.get_u32())
    }

    fn get_u8(&mut self, layer: &'static str, field: &'static str) -> Result<u8, SnapshotError> {
        self.need(1, layer, field)?;
        Ok(self.rest.get_u8())
    }

    fn take(&mut self, n: usize, layer: &'static str, field: &'static str) -> Result<&'a [u8], SnapshotError> {
        self.need(n, layer, field)?;
        let (out, rest) = self.rest.split_at(n);
        self.rest = rest;
        Ok(out)
    }
}

/// Reads the fields of a single layer, in schema order.
#[derive(Debug)]
pub struct LayerDecoder<'d, 'a> {
    dec: &'d mut StateDecoder<'a>,
    schema: &'static LayerSchema,
    next: usize,
}

impl<'a> LayerDecoder<'_, 'a> {
    /// Reads a `u32` field.
    pub fn u32(&mut self, field: &'static str) -> Result<u32, SnapshotError> {
        self.schema.check(self.next, field, FieldKind::U32)?;
        let value = self.dec.get_u32(self.schema.layer, field)?;
        self.next += 1;
        Ok(value)
    }

    /// Reads a boolean field.
    pub fn bool(&mut self, field: &'static str) -> Result<bool, SnapshotError> {
        self.schema.check(self.next, field, FieldKind::Bool)?;
        let raw = self.dec.get_u8(self.schema.layer, field)?;
        self.next += 1;
        match raw {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(SnapshotError::InvalidBool {
                layer: self.schema.layer,
                field,
                value,
            }),
        }
    }

    /// Reads a length-prefixed byte string field.
    pub fn bytes(&mut self, field: &'static str) -> Result<&'a [u8], SnapshotError> {
        self.schema.check(self.next, field, FieldKind::Bytes)?;
        let len = self.dec.get_u32(self.schema.layer, field)? as usize;
        let out = self.dec.take(len, self.schema.layer, field)?;
        self.next += 1;
        Ok(out)
    }

    /// Reads a byte string field that must be UTF-8.
    pub fn string(&mut self, field: &'static str) -> Result<&'a str, SnapshotError> {
        let layer = self.schema.layer;
        let raw = self.bytes(field)?;
        std::str::from_utf8(raw).map_err(|_| SnapshotError::InvalidUtf8 { layer, field })
    }

    /// Reads the next field whatever its type, for schema-driven walks.
    pub fn value(&mut self) -> Result<Option<(&'static FieldSpec, FieldValue<'a>)>, SnapshotError> {
        let schema: &'static LayerSchema = self.schema;
        let Some(spec) = schema.fields.get(self.next) else {
            return Ok(None);
        };
        let value = match spec.kind {
            FieldKind::U32 => FieldValue::U32(self.u32(spec.name)?),
            FieldKind::Bool => FieldValue::Bool(self.bool(spec.name)?),
            FieldKind::Bytes => FieldValue::Bytes(self.bytes(spec.name)?),
        };
        Ok(Some((spec, value)))
    }

    /// Ends the layer, checking every schema field was read.
    pub fn finish(self) -> Result<(), SnapshotError> {
        if self.next == self.schema.fields.len() {
            return Ok(());
        }
        Err(SnapshotError::SchemaMismatch {
            layer: self.schema.layer,
            field: self.schema.fields[self.next].name,
        })
    }
}

/// One field of a walked snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedField<'a> {
    /// Layer the field belongs to.
    pub layer: &'static str,
    /// Field name.
    pub field: &'static str,
    /// Decoded value.
    pub value: FieldValue<'a>,
}

/// Decodes `layers` in order without interpreting them.
///
/// Used by tooling that prints snapshots, and by tests asserting that the
/// dump path of a component produces exactly what its schema declares.
pub fn walk<'a>(
    dec: &mut StateDecoder<'a>,
    layers: &[&'static LayerSchema],
) -> Result<Vec<WalkedField<'a>>, SnapshotError> {
    let mut out = Vec::new();
    for schema in layers {
        let mut layer = dec.layer(schema)?;
        while let Some((spec, value)) = layer.value()? {
            out.push(WalkedField {
                layer: schema.layer,
                field: spec.name,
                value,
            });
        }
        layer.finish()?;
    }
    Ok(out)
}
