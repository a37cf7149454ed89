//! Field-tagged payload encoding shared by every message kind.
//!
//! Each payload is a count-prefixed list of `(tag: u16, len: u16, value)`
//! records. New fields can be appended without breaking older decoders, and
//! decoders that only care about a subset of fields can skip the rest
//! without understanding their contents.

#![expect(clippy::big_endian_bytes, reason = "wire payloads are big-endian")]

use crate::error::FrameError;

fn decode_error(detail: impl Into<String>) -> FrameError {
    FrameError::PayloadDecodeError(detail.into())
}

/// Append one tagged field to a payload buffer being built.
fn write_field(buf: &mut Vec<u8>, tag: u16, value: &[u8]) -> Result<(), FrameError> {
    let len = u16::try_from(value.len()).map_err(|_| decode_error("field too large"))?;
    buf.extend_from_slice(&tag.to_be_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value);
    Ok(())
}

/// Builder for a field-tagged payload.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    fields: Vec<u8>,
    count: u16,
}

impl PayloadWriter {
    /// Create an empty payload writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, tag: u16, value: &[u8]) -> Result<(), FrameError> {
        write_field(&mut self.fields, tag, value)?;
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| decode_error("too many fields"))?;
        Ok(())
    }

    /// Write a `u32` field.
    pub fn write_u32(&mut self, tag: u16, value: u32) -> Result<(), FrameError> {
        self.push(tag, &value.to_be_bytes())
    }

    /// Write an `i32` field.
    pub fn write_i32(&mut self, tag: u16, value: i32) -> Result<(), FrameError> {
        self.push(tag, &value.to_be_bytes())
    }

    /// Write an `f64` field.
    pub fn write_f64(&mut self, tag: u16, value: f64) -> Result<(), FrameError> {
        self.push(tag, &value.to_be_bytes())
    }

    /// Write a UTF-8 string field.
    pub fn write_str(&mut self, tag: u16, value: &str) -> Result<(), FrameError> {
        self.push(tag, value.as_bytes())
    }

    /// Write a single-byte enum tag field.
    pub fn write_u8(&mut self, tag: u16, value: u8) -> Result<(), FrameError> {
        self.push(tag, &[value])
    }

    /// Finish building and return the assembled payload bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.fields.len());
        buf.extend_from_slice(&self.count.to_be_bytes());
        buf.extend_from_slice(&self.fields);
        buf
    }
}

/// One decoded `(tag, value)` pair from a payload.
pub type Field<'a> = (u16, &'a [u8]);

/// Parse a field-tagged payload into its constituent fields.
///
/// # Errors
/// Returns [`FrameError::PayloadDecodeError`] if the buffer is truncated or
/// declares a field longer than the remaining bytes.
pub fn read_fields(buf: &[u8]) -> Result<Vec<Field<'_>>, FrameError> {
    if buf.len() < 2 {
        return Err(decode_error("payload shorter than field count"));
    }
    let Some(count_bytes) = buf.get(0..2) else {
        return Err(decode_error("payload shorter than field count"));
    };
    let Ok(count_arr): Result<[u8; 2], _> = count_bytes.try_into() else {
        return Err(decode_error("payload shorter than field count"));
    };
    let count = u16::from_be_bytes(count_arr);
    let mut offset = 2usize;
    let mut fields = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let header = buf
            .get(offset..offset.checked_add(4).ok_or_else(|| decode_error("offset overflow"))?)
            .ok_or_else(|| decode_error("truncated field header"))?;
        let tag_bytes: [u8; 2] = header
            .get(0..2)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| decode_error("truncated field header"))?;
        let len_bytes: [u8; 2] = header
            .get(2..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| decode_error("truncated field header"))?;
        let tag = u16::from_be_bytes(tag_bytes);
        let len = usize::from(u16::from_be_bytes(len_bytes));
        offset = offset.checked_add(4).ok_or_else(|| decode_error("offset overflow"))?;
        let value = buf
            .get(offset..offset.checked_add(len).ok_or_else(|| decode_error("offset overflow"))?)
            .ok_or_else(|| decode_error("truncated field value"))?;
        fields.push((tag, value));
        offset = offset.checked_add(len).ok_or_else(|| decode_error("offset overflow"))?;
    }
    if offset != buf.len() {
        return Err(decode_error("trailing bytes after last field"));
    }
    Ok(fields)
}

/// Look up the first occurrence of `tag` among decoded fields.
#[must_use]
pub fn find<'a>(fields: &[Field<'a>], tag: u16) -> Option<&'a [u8]> {
    fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v)
}

/// Decode a required `u32` field.
///
/// # Errors
/// Returns an error if the field is absent or not exactly four bytes.
pub fn require_u32(fields: &[Field<'_>], tag: u16, name: &'static str) -> Result<u32, FrameError> {
    let bytes = find(fields, tag).ok_or_else(|| decode_error(format!("missing field {name}")))?;
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| decode_error(format!("field {name} has wrong width")))?;
    Ok(u32::from_be_bytes(arr))
}

/// Decode a required `i32` field.
///
/// # Errors
/// Returns an error if the field is absent or not exactly four bytes.
pub fn require_i32(fields: &[Field<'_>], tag: u16, name: &'static str) -> Result<i32, FrameError> {
    let bytes = find(fields, tag).ok_or_else(|| decode_error(format!("missing field {name}")))?;
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| decode_error(format!("field {name} has wrong width")))?;
    Ok(i32::from_be_bytes(arr))
}

/// Decode a required `f64` field.
///
/// # Errors
/// Returns an error if the field is absent or not exactly eight bytes.
pub fn require_f64(fields: &[Field<'_>], tag: u16, name: &'static str) -> Result<f64, FrameError> {
    let bytes = find(fields, tag).ok_or_else(|| decode_error(format!("missing field {name}")))?;
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| decode_error(format!("field {name} has wrong width")))?;
    Ok(f64::from_be_bytes(arr))
}

/// Decode a required UTF-8 string field.
///
/// # Errors
/// Returns an error if the field is absent or not valid UTF-8.
pub fn require_str(fields: &[Field<'_>], tag: u16, name: &'static str) -> Result<String, FrameError> {
    let bytes = find(fields, tag).ok_or_else(|| decode_error(format!("missing field {name}")))?;
    std::str::from_utf8(bytes)
        .map(ToOwned::to_owned)
        .map_err(|_| decode_error(format!("field {name} is not valid utf-8")))
}

/// Decode a required single-byte enum tag field.
///
/// # Errors
/// Returns an error if the field is absent or not exactly one byte.
pub fn require_u8(fields: &[Field<'_>], tag: u16, name: &'static str) -> Result<u8, FrameError> {
    let bytes = find(fields, tag).ok_or_else(|| decode_error(format!("missing field {name}")))?;
    bytes
        .first()
        .copied()
        .filter(|_| bytes.len() == 1)
        .ok_or_else(|| decode_error(format!("field {name} has wrong width")))
}

/// Decode an optional `u32` field, defaulting to `0` when absent.
///
/// # Errors
/// Returns an error if the field is present but not exactly four bytes.
pub fn optional_u32(fields: &[Field<'_>], tag: u16, name: &'static str) -> Result<u32, FrameError> {
    match find(fields, tag) {
        None => Ok(0),
        Some(bytes) => {
            let arr: [u8; 4] = bytes
                .try_into()
                .map_err(|_| decode_error(format!("field {name} has wrong width")))?;
            Ok(u32::from_be_bytes(arr))
        }
    }
}
