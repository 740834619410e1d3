//! AMF0 encoder and decoder
//!
//! AMF0 is the self-describing serialization used in RTMP command payloads.
//! Reference: AMF0 File Format Specification.
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (associative array, 32-bit advisory count)
//! 0x09 - Object End
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! ```
//!
//! Reserved markers (MovieClip 0x04, Reference 0x07, Unsupported 0x0D,
//! RecordSet 0x0E, ...) are rejected: a relay has no use for them and a
//! payload carrying one is broken.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{Amf0Object, Amf0Value};
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

/// Marker of the next value in `data`, without consuming anything.
///
/// Errors on empty input and on reserved/unsupported markers.
pub fn discover(data: &[u8]) -> Result<u8, AmfError> {
    let marker = *data.first().ok_or(AmfError::TruncatedInput)?;
    match marker {
        MARKER_NUMBER | MARKER_BOOLEAN | MARKER_STRING | MARKER_OBJECT | MARKER_NULL
        | MARKER_UNDEFINED | MARKER_ECMA_ARRAY | MARKER_OBJECT_END | MARKER_STRICT_ARRAY
        | MARKER_DATE | MARKER_LONG_STRING => Ok(marker),
        other => Err(AmfError::UnknownMarker(other)),
    }
}

/// Decode a single value, returning it and the number of bytes consumed
/// so callers can decode a stream of concatenated values.
pub fn decode(data: &[u8]) -> Result<(Amf0Value, usize), AmfError> {
    let mut cursor = Cursor::new(data);
    let value = cursor.read_value()?;
    Ok((value, cursor.position))
}

/// Decode concatenated values until the input is exhausted.
pub fn decode_all(data: &[u8]) -> Result<Vec<Amf0Value>, AmfError> {
    let mut values = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (value, consumed) = decode(&data[offset..])?;
        values.push(value);
        offset += consumed;
    }
    Ok(values)
}

/// Encode a single value.
pub fn encode(value: &Amf0Value) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    write_value(&mut buf, value);
    buf.freeze()
}

/// Encode multiple values back to back.
pub fn encode_all(values: &[Amf0Value]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    for value in values {
        write_value(&mut buf, value);
    }
    buf.freeze()
}

struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AmfError> {
        if self.remaining() < n {
            return Err(AmfError::TruncatedInput);
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, AmfError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, AmfError> {
        let mut s = self.take(2)?;
        Ok(s.get_u16())
    }

    fn read_u32(&mut self) -> Result<u32, AmfError> {
        let mut s = self.take(4)?;
        Ok(s.get_u32())
    }

    fn read_f64(&mut self) -> Result<f64, AmfError> {
        let mut s = self.take(8)?;
        Ok(s.get_f64())
    }

    /// UTF-8 field with 16-bit length prefix (no type marker)
    fn read_utf8(&mut self) -> Result<String, AmfError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }

    /// UTF-8 field with 32-bit length prefix
    fn read_utf8_long(&mut self) -> Result<String, AmfError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }

    fn read_value(&mut self) -> Result<Amf0Value, AmfError> {
        if self.remaining() == 0 {
            return Err(AmfError::TruncatedInput);
        }
        discover(&self.data[self.position..])?;
        let marker = self.read_u8()?;

        match marker {
            MARKER_NUMBER => Ok(Amf0Value::Number(self.read_f64()?)),
            MARKER_BOOLEAN => Ok(Amf0Value::Boolean(self.read_u8()? != 0)),
            MARKER_STRING => Ok(Amf0Value::String(self.read_utf8()?)),
            MARKER_OBJECT => Ok(Amf0Value::Object(self.read_properties()?)),
            MARKER_NULL => Ok(Amf0Value::Null),
            MARKER_UNDEFINED => Ok(Amf0Value::Undefined),
            MARKER_ECMA_ARRAY => {
                // the count is advisory and sometimes wrong; the object-end
                // marker is the real terminator
                let _count = self.read_u32()?;
                Ok(Amf0Value::EcmaArray(self.read_properties()?))
            }
            MARKER_STRICT_ARRAY => {
                let count = self.read_u32()? as usize;
                let mut elements = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    elements.push(self.read_value()?);
                }
                Ok(Amf0Value::StrictArray(elements))
            }
            MARKER_DATE => {
                let timestamp = self.read_f64()?;
                let _zone = self.take(2)?;
                Ok(Amf0Value::Date(timestamp))
            }
            MARKER_LONG_STRING => Ok(Amf0Value::String(self.read_utf8_long()?)),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    /// (UTF8 key, value) pairs until the zero-length-key object-end marker
    fn read_properties(&mut self) -> Result<Amf0Object, AmfError> {
        let mut object = Amf0Object::new();
        loop {
            let key = self.read_utf8()?;
            if key.is_empty() {
                let end = self.read_u8()?;
                if end != MARKER_OBJECT_END {
                    return Err(AmfError::UnknownMarker(end));
                }
                return Ok(object);
            }
            let value = self.read_value()?;
            object.set(&key, value);
        }
    }
}

fn write_value(buf: &mut BytesMut, value: &Amf0Value) {
    match value {
        Amf0Value::Number(n) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*n);
        }
        Amf0Value::Boolean(b) => {
            buf.put_u8(MARKER_BOOLEAN);
            buf.put_u8(u8::from(*b));
        }
        Amf0Value::String(s) => {
            if s.len() > 0xFFFF {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            } else {
                buf.put_u8(MARKER_STRING);
                write_utf8(buf, s);
            }
        }
        Amf0Value::Object(obj) => {
            buf.put_u8(MARKER_OBJECT);
            write_properties(buf, obj);
        }
        Amf0Value::Null => buf.put_u8(MARKER_NULL),
        Amf0Value::Undefined => buf.put_u8(MARKER_UNDEFINED),
        Amf0Value::EcmaArray(obj) => {
            buf.put_u8(MARKER_ECMA_ARRAY);
            buf.put_u32(obj.len() as u32);
            write_properties(buf, obj);
        }
        Amf0Value::StrictArray(elements) => {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(elements.len() as u32);
            for element in elements {
                write_value(buf, element);
            }
        }
        Amf0Value::Date(timestamp) => {
            buf.put_u8(MARKER_DATE);
            buf.put_f64(*timestamp);
            buf.put_i16(0);
        }
    }
}

fn write_properties(buf: &mut BytesMut, obj: &Amf0Object) {
    for (key, value) in obj.iter() {
        write_utf8(buf, key);
        write_value(buf, value);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

fn write_utf8(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}
