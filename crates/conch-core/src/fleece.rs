//! Decoder for the compact tagged binary encoding used by Couchbase-Lite style
//! document stores.
//!
//! Every value starts with a tag byte whose high nibble selects the class.
//! Values are 2-byte aligned and collections hold fixed-size slots that either
//! carry a small value inline or a backward pointer to the real value.

use crate::value::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_DEPTH: usize = 64;

const NARROW_SLOT: usize = 2;
const WIDE_SLOT: usize = 4;
const OVERFLOW_COUNT: usize = 0x07FF;
const LONG_STRING_LEN: u8 = 0x0F;
const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short: {len} bytes")]
    Truncated { len: usize },
    #[error("buffer length {len} is not 2-byte aligned")]
    Misaligned { len: usize },
    #[error("read of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("unsupported encoding at offset {offset}: {what}")]
    Unsupported { offset: usize, what: &'static str },
    #[error("invalid pointer at offset {offset}")]
    InvalidPointer { offset: usize },
    #[error("unsigned integer at offset {offset} does not fit in i64")]
    IntegerOverflow { offset: usize },
    #[error("invalid varint at offset {offset}")]
    InvalidVarint { offset: usize },
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("map key at offset {offset} is neither a string nor a shared key")]
    InvalidKey { offset: usize },
    #[error("shared key index {index} not present in a table of {size}")]
    UnknownSharedKey { index: i64, size: usize },
    #[error("nesting deeper than {max} levels")]
    TooDeep { max: usize },
    #[error("shared key table must be an array of strings")]
    InvalidSharedKeys,
}

/// Decodes the root value of `data`, resolving integer map keys through
/// `shared_keys`.
pub fn decode(data: &[u8], shared_keys: &[String]) -> Result<Value, DecodeError> {
    Decoder::new(data, shared_keys).decode_root()
}

/// Decodes a shared-key table, which is itself an encoded array of strings.
pub fn decode_shared_keys(data: &[u8]) -> Result<Vec<String>, DecodeError> {
    match decode(data, &[])? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(key) => Ok(key),
                _ => Err(DecodeError::InvalidSharedKeys),
            })
            .collect(),
        _ => Err(DecodeError::InvalidSharedKeys),
    }
}

pub struct Decoder<'a> {
    data: &'a [u8],
    shared_keys: &'a [String],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], shared_keys: &'a [String]) -> Self {
        Self { data, shared_keys }
    }

    /// The trailing two bytes hold the root, normally as a narrow pointer.
    pub fn decode_root(&self) -> Result<Value, DecodeError> {
        let len = self.data.len();
        if len < NARROW_SLOT {
            return Err(DecodeError::Truncated { len });
        }
        if len % 2 != 0 {
            return Err(DecodeError::Misaligned { len });
        }
        self.decode_at(len - NARROW_SLOT, false, 0)
    }

    fn decode_at(&self, offset: usize, wide: bool, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep { max: MAX_DEPTH });
        }

        let tag = self.byte(offset)?;
        match tag >> 4 {
            0x0 => self.small_int(offset, tag).map(Value::Int),
            0x1 => self.long_int(offset, tag).map(Value::Int),
            0x2 => self.float(offset, tag).map(Value::Float),
            0x3 => Ok(special(tag)),
            0x4 => self.string(offset, tag).map(Value::String),
            0x5 => Err(DecodeError::Unsupported {
                offset,
                what: "binary data",
            }),
            0x6 => self.array(offset, tag, depth),
            0x7 => self.map(offset, tag, depth),
            _ => {
                let target = self.pointer_target(offset, wide)?;
                self.decode_at(target, true, depth + 1)
            }
        }
    }

    fn small_int(&self, offset: usize, tag: u8) -> Result<i64, DecodeError> {
        let low = self.byte(offset + 1)?;
        let raw = (i64::from(tag & 0x0F) << 8) | i64::from(low);
        if raw & 0x800 != 0 {
            Ok(raw - 0x1000)
        } else {
            Ok(raw)
        }
    }

    fn long_int(&self, offset: usize, tag: u8) -> Result<i64, DecodeError> {
        let unsigned = tag & 0x08 != 0;
        let count = usize::from(tag & 0x07) + 1;
        let bytes = self.slice(offset + 1, count)?;

        let mut raw: u64 = 0;
        for (index, byte) in bytes.iter().enumerate() {
            raw |= u64::from(*byte) << (8 * index);
        }

        if unsigned {
            i64::try_from(raw).map_err(|_| DecodeError::IntegerOverflow { offset })
        } else {
            let shift = 64 - 8 * count as u32;
            Ok(((raw << shift) as i64) >> shift)
        }
    }

    fn float(&self, offset: usize, tag: u8) -> Result<f64, DecodeError> {
        if tag & 0x08 != 0 {
            let bytes = self.slice(offset + 2, 8)?;
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(bytes);
            Ok(f64::from_le_bytes(raw))
        } else {
            let bytes = self.slice(offset + 2, 4)?;
            let mut raw = [0_u8; 4];
            raw.copy_from_slice(bytes);
            Ok(f64::from(f32::from_le_bytes(raw)))
        }
    }

    fn string(&self, offset: usize, tag: u8) -> Result<String, DecodeError> {
        let short_len = tag & 0x0F;
        let (start, len) = if short_len < LONG_STRING_LEN {
            (offset + 1, usize::from(short_len))
        } else {
            let (len, used) = self.varint(offset + 1)?;
            (offset + 1 + used, len)
        };
        let bytes = self.slice(start, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    fn varint(&self, offset: usize) -> Result<(usize, usize), DecodeError> {
        let mut value: u64 = 0;
        for index in 0..MAX_VARINT_BYTES {
            let byte = self.byte(offset + index)?;
            if index == MAX_VARINT_BYTES - 1 && byte > 0x01 {
                return Err(DecodeError::InvalidVarint { offset });
            }
            value |= u64::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                let value =
                    usize::try_from(value).map_err(|_| DecodeError::InvalidVarint { offset })?;
                return Ok((value, index + 1));
            }
        }
        Err(DecodeError::InvalidVarint { offset })
    }

    fn collection_header(&self, offset: usize, tag: u8) -> Result<(bool, usize), DecodeError> {
        let wide = tag & 0x08 != 0;
        let count = (usize::from(tag & 0x07) << 8) | usize::from(self.byte(offset + 1)?);
        if count == OVERFLOW_COUNT {
            return Err(DecodeError::Unsupported {
                offset,
                what: "collection count overflow",
            });
        }
        Ok((wide, count))
    }

    fn array(&self, offset: usize, tag: u8, depth: usize) -> Result<Value, DecodeError> {
        let (wide, count) = self.collection_header(offset, tag)?;
        let stride = if wide { WIDE_SLOT } else { NARROW_SLOT };
        self.slice(offset + 2, count * stride)?;

        let mut items = Vec::with_capacity(count);
        for index in 0..count {
            items.push(self.decode_at(offset + 2 + index * stride, wide, depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn map(&self, offset: usize, tag: u8, depth: usize) -> Result<Value, DecodeError> {
        let (wide, count) = self.collection_header(offset, tag)?;
        let stride = if wide { WIDE_SLOT } else { NARROW_SLOT };
        self.slice(offset + 2, count * 2 * stride)?;

        let mut entries = BTreeMap::new();
        for index in 0..count {
            let key_offset = offset + 2 + index * 2 * stride;
            let key = match self.decode_at(key_offset, wide, depth + 1)? {
                Value::String(key) => key,
                Value::Int(shared) => self.shared_key(shared)?,
                _ => return Err(DecodeError::InvalidKey { offset: key_offset }),
            };
            let value = self.decode_at(key_offset + stride, wide, depth + 1)?;
            entries.insert(key, value);
        }
        Ok(Value::Map(entries))
    }

    fn shared_key(&self, index: i64) -> Result<String, DecodeError> {
        usize::try_from(index)
            .ok()
            .and_then(|position| self.shared_keys.get(position))
            .cloned()
            .ok_or(DecodeError::UnknownSharedKey {
                index,
                size: self.shared_keys.len(),
            })
    }

    fn pointer_target(&self, offset: usize, wide: bool) -> Result<usize, DecodeError> {
        let units = if wide {
            let bytes = self.slice(offset, WIDE_SLOT)?;
            let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (raw & 0x7FFF_FFFF) as usize
        } else {
            let bytes = self.slice(offset, NARROW_SLOT)?;
            let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
            usize::from(raw & 0x7FFF)
        };
        if units == 0 {
            return Err(DecodeError::InvalidPointer { offset });
        }
        units
            .checked_mul(2)
            .and_then(|delta| offset.checked_sub(delta))
            .ok_or(DecodeError::InvalidPointer { offset })
    }

    fn byte(&self, offset: usize) -> Result<u8, DecodeError> {
        self.data
            .get(offset)
            .copied()
            .ok_or(DecodeError::OutOfBounds {
                offset,
                len: 1,
                size: self.data.len(),
            })
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(DecodeError::OutOfBounds {
                offset,
                len,
                size: self.data.len(),
            })
    }
}

fn special(tag: u8) -> Value {
    match tag & 0x0C {
        0x04 => Value::Bool(false),
        0x08 => Value::Bool(true),
        // 0x00 is null and 0x0C is "undefined"; both read as absent.
        _ => Value::Null,
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_encoder {
    //! Minimal writer for the same layout, used to produce fixtures.

    use crate::value::Value;

    #[derive(Debug, Clone, Copy)]
    pub enum Slot {
        Inline([u8; 2]),
        At(usize),
    }

    #[derive(Default)]
    pub struct Encoder {
        pub buf: Vec<u8>,
    }

    impl Encoder {
        pub fn write(&mut self, value: &Value) -> Slot {
            if let Some(inline) = inline_bytes(value) {
                return Slot::Inline(inline);
            }
            match value {
                Value::Array(items) => {
                    let slots = items.iter().map(|item| self.write(item)).collect::<Vec<_>>();
                    self.array(&slots, false)
                }
                Value::Map(entries) => {
                    let slots = entries
                        .iter()
                        .map(|(key, value)| {
                            let key = self.write(&Value::String(key.clone()));
                            (key, self.write(value))
                        })
                        .collect::<Vec<_>>();
                    self.map(&slots)
                }
                other => {
                    let bytes = scalar_bytes(other);
                    self.out_of_line(&bytes)
                }
            }
        }

        pub fn array(&mut self, slots: &[Slot], wide: bool) -> Slot {
            let start = self.align();
            let count = slots.len();
            let wide_bit = if wide { 0x08 } else { 0x00 };
            self.buf
                .push(0x60 | wide_bit | ((count >> 8) as u8 & 0x07));
            self.buf.push(count as u8);
            for slot in slots {
                self.put_slot(*slot, wide);
            }
            Slot::At(start)
        }

        pub fn map(&mut self, slots: &[(Slot, Slot)]) -> Slot {
            let start = self.align();
            let count = slots.len();
            self.buf.push(0x70 | ((count >> 8) as u8 & 0x07));
            self.buf.push(count as u8);
            for (key, value) in slots {
                self.put_slot(*key, false);
                self.put_slot(*value, false);
            }
            Slot::At(start)
        }

        pub fn finish(mut self, root: Slot) -> Vec<u8> {
            self.align();
            self.put_slot(root, false);
            self.buf
        }

        pub fn out_of_line(&mut self, bytes: &[u8]) -> Slot {
            let start = self.align();
            self.buf.extend_from_slice(bytes);
            Slot::At(start)
        }

        fn put_slot(&mut self, slot: Slot, wide: bool) {
            let here = self.buf.len();
            match slot {
                Slot::Inline(bytes) => {
                    self.buf.extend_from_slice(&bytes);
                    if wide {
                        self.buf.extend_from_slice(&[0, 0]);
                    }
                }
                Slot::At(target) => {
                    let units = (here - target) / 2;
                    if wide {
                        let raw = 0x8000_0000_u32 | units as u32;
                        self.buf.extend_from_slice(&raw.to_be_bytes());
                    } else {
                        assert!(units < 0x8000, "narrow pointer out of range");
                        let raw = 0x8000_u16 | units as u16;
                        self.buf.extend_from_slice(&raw.to_be_bytes());
                    }
                }
            }
        }

        fn align(&mut self) -> usize {
            if self.buf.len() % 2 != 0 {
                self.buf.push(0);
            }
            self.buf.len()
        }
    }

    pub fn small_int(value: i64) -> [u8; 2] {
        let raw = (value & 0x0FFF) as u16;
        [(raw >> 8) as u8, raw as u8]
    }

    fn inline_bytes(value: &Value) -> Option<[u8; 2]> {
        match value {
            Value::Null => Some([0x30, 0]),
            Value::Bool(false) => Some([0x34, 0]),
            Value::Bool(true) => Some([0x38, 0]),
            Value::Int(value) if (-2048..=2047).contains(value) => Some(small_int(*value)),
            Value::String(value) if value.is_empty() => Some([0x40, 0]),
            Value::String(value) if value.len() == 1 => Some([0x41, value.as_bytes()[0]]),
            _ => None,
        }
    }

    fn scalar_bytes(value: &Value) -> Vec<u8> {
        match value {
            Value::Int(value) => {
                let mut bytes = vec![0x17];
                bytes.extend_from_slice(&value.to_le_bytes());
                bytes
            }
            Value::Float(value) => {
                let mut bytes = vec![0x28, 0];
                bytes.extend_from_slice(&value.to_le_bytes());
                bytes
            }
            Value::String(value) => {
                let mut bytes = Vec::new();
                if value.len() < 0x0F {
                    bytes.push(0x40 | value.len() as u8);
                } else {
                    bytes.push(0x4F);
                    let mut len = value.len();
                    loop {
                        let byte = (len & 0x7F) as u8;
                        len >>= 7;
                        if len == 0 {
                            bytes.push(byte);
                            break;
                        }
                        bytes.push(byte | 0x80);
                    }
                }
                bytes.extend_from_slice(value.as_bytes());
                bytes
            }
            other => unreachable!("not a scalar: {other:?}"),
        }
    }
}
