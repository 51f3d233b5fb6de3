//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.
//! Readers return the decoded value together with the unread remainder.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16, I32, U16, U32};

use crate::error::{Error, Result};

fn too_short(what: &str, need: usize, have: usize) -> Error {
    Error::Protocol(format!("{what}: buffer too short: {have} < {need}"))
}

macro_rules! read_be {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $be:ty) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(data: &[u8]) -> Result<($ty, &[u8])> {
            let (value, rest) = <$be>::read_from_prefix(data)
                .map_err(|_| too_short(stringify!($name), size_of::<$be>(), data.len()))?;
            Ok((value.get(), rest))
        }
    };
}

read_be!(
    /// Read 2-byte big-endian signed integer.
    read_i16, i16, I16
);
read_be!(
    /// Read 2-byte big-endian unsigned integer.
    read_u16, u16, U16
);
read_be!(
    /// Read 4-byte big-endian signed integer.
    read_i32, i32, I32
);
read_be!(
    /// Read 4-byte big-endian unsigned integer.
    read_u32, u32, U32
);

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(too_short("read_u8", 1, 0)),
    }
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len)
        .ok_or_else(|| too_short("read_bytes", len, data.len()))
}

/// Read an Int32 length followed by that many bytes; -1 is NULL.
#[inline]
pub fn read_nullable_bytes(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    let (len, rest) = read_i32(data)?;
    match len {
        -1 => Ok((None, rest)),
        len if len < 0 => Err(Error::Protocol(format!("invalid value length {len}"))),
        len => {
            let (value, rest) = read_bytes(rest, len as usize)?;
            Ok((Some(value), rest))
        }
    }
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
    let (bytes, rest) = data.split_at(pos);
    Ok((bytes, rest.get(1..).unwrap_or_default()))
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|_| Error::Protocol("read_cstr: invalid UTF-8".into()))?;
    Ok((s, rest))
}

/// Write 2-byte big-endian signed integer.
#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 2-byte big-endian unsigned integer.
#[inline]
pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian signed integer.
#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian unsigned integer.
#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write null-terminated string from &str.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Message builder that back-fills the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_untyped(buf)
    }

    /// Start building a message without a type byte (StartupMessage, CancelRequest).
    pub fn new_untyped(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_u16(&mut self, value: u16) {
        write_u16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Write an Int32 length and the bytes, or -1 for NULL.
    pub fn write_nullable_bytes(&mut self, value: Option<&[u8]>) {
        match value {
            Some(data) => {
                self.write_i32(data.len() as i32);
                self.write_bytes(data);
            }
            None => self.write_i32(-1),
        }
    }

    /// Fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
    }
}
