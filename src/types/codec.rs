//! Codec contracts and the built-in scalar codecs.

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;

use super::{TypeCache, TypeInfo, TypeRef, oid};

/// A dynamically typed column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Session settings a codec may consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecContext {
    /// Truncate decoded text and bytea values to this many bytes.
    pub max_field_length: Option<usize>,
}

impl CodecContext {
    fn truncate_bytes(&self, mut bytes: Vec<u8>) -> Vec<u8> {
        if let Some(max) = self.max_field_length {
            bytes.truncate(max);
        }
        bytes
    }

    fn truncate_text(&self, mut text: String) -> String {
        if let Some(mut max) = self.max_field_length
            && max < text.len()
        {
            while !text.is_char_boundary(max) {
                max -= 1;
            }
            text.truncate(max);
        }
        text
    }
}

/// Converts values of one wire format.
pub trait Codec: Send + Sync {
    /// Append the encoding of `value` as type `ty` to `buf`.
    fn encode(&self, ty: &TypeInfo, buf: &mut Vec<u8>, value: &Value, ctx: &CodecContext)
    -> Result<()>;

    /// Decode one non-NULL value of type `ty`.
    fn decode(&self, ty: &TypeInfo, buf: &[u8], ctx: &CodecContext) -> Result<Value>;
}

/// Finds the codec for a resolved type.
pub trait CodecLookup: Send + Sync {
    fn binary_codec(&self, ty: &TypeInfo) -> Option<&dyn Codec>;
    fn text_codec(&self, ty: &TypeInfo) -> Option<&dyn Codec>;
}

/// Binary codecs for the built-in scalar types, text for everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCodecs;

struct BinaryCodec;
struct TextCodec;

static BINARY: BinaryCodec = BinaryCodec;
static TEXT: TextCodec = TextCodec;

impl CodecLookup for BuiltinCodecs {
    fn binary_codec(&self, ty: &TypeInfo) -> Option<&dyn Codec> {
        match ty.oid {
            oid::BOOL
            | oid::BYTEA
            | oid::NAME
            | oid::INT8
            | oid::INT2
            | oid::INT4
            | oid::TEXT
            | oid::OID
            | oid::FLOAT4
            | oid::FLOAT8
            | oid::BPCHAR
            | oid::VARCHAR => Some(&BINARY),
            _ => None,
        }
    }

    fn text_codec(&self, _ty: &TypeInfo) -> Option<&dyn Codec> {
        Some(&TEXT)
    }
}

fn mismatch(ty: &TypeInfo, value: &Value) -> Error {
    Error::InvalidUsage(format!("cannot encode {value:?} as {}", ty.name))
}

fn fixed<const N: usize>(ty: &TypeInfo, buf: &[u8]) -> Result<[u8; N]> {
    buf.try_into().map_err(|_| {
        Error::Decode(format!(
            "invalid {} length: expected {N}, got {}",
            ty.name,
            buf.len()
        ))
    })
}

fn utf8(buf: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(buf).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn is_text_type(oid: crate::protocol::types::Oid) -> bool {
    matches!(
        oid,
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::UNKNOWN
    )
}

impl Codec for BinaryCodec {
    fn encode(
        &self,
        ty: &TypeInfo,
        buf: &mut Vec<u8>,
        value: &Value,
        _ctx: &CodecContext,
    ) -> Result<()> {
        match (ty.oid, value) {
            (oid::BOOL, Value::Bool(v)) => buf.push(u8::from(*v)),
            (oid::INT2, Value::Int2(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oid::INT4, Value::Int2(v)) => buf.extend_from_slice(&i32::from(*v).to_be_bytes()),
            (oid::INT4, Value::Int4(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oid::INT8, Value::Int2(v)) => buf.extend_from_slice(&i64::from(*v).to_be_bytes()),
            (oid::INT8, Value::Int4(v)) => buf.extend_from_slice(&i64::from(*v).to_be_bytes()),
            (oid::INT8, Value::Int8(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oid::OID, Value::Int8(v)) => {
                let v = u32::try_from(*v).map_err(|_| mismatch(ty, value))?;
                buf.extend_from_slice(&v.to_be_bytes());
            }
            (oid::FLOAT4, Value::Float4(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oid::FLOAT8, Value::Float4(v)) => buf.extend_from_slice(&f64::from(*v).to_be_bytes()),
            (oid::FLOAT8, Value::Float8(v)) => buf.extend_from_slice(&v.to_be_bytes()),
            (oid::BYTEA, Value::Bytes(v)) => buf.extend_from_slice(v),
            (oid, Value::Text(v)) if is_text_type(oid) => buf.extend_from_slice(v.as_bytes()),
            _ => return Err(mismatch(ty, value)),
        }
        Ok(())
    }

    fn decode(&self, ty: &TypeInfo, buf: &[u8], ctx: &CodecContext) -> Result<Value> {
        Ok(match ty.oid {
            oid::BOOL => Value::Bool(fixed::<1>(ty, buf)?[0] != 0),
            oid::INT2 => Value::Int2(i16::from_be_bytes(fixed(ty, buf)?)),
            oid::INT4 => Value::Int4(i32::from_be_bytes(fixed(ty, buf)?)),
            oid::INT8 => Value::Int8(i64::from_be_bytes(fixed(ty, buf)?)),
            oid::OID => Value::Int8(i64::from(u32::from_be_bytes(fixed(ty, buf)?))),
            oid::FLOAT4 => Value::Float4(f32::from_be_bytes(fixed(ty, buf)?)),
            oid::FLOAT8 => Value::Float8(f64::from_be_bytes(fixed(ty, buf)?)),
            oid::BYTEA => Value::Bytes(ctx.truncate_bytes(buf.to_vec())),
            oid if is_text_type(oid) => Value::Text(ctx.truncate_text(utf8(buf)?.to_string())),
            _ => {
                return Err(Error::Decode(format!(
                    "no binary decoding for type {}",
                    ty.name
                )));
            }
        })
    }
}

fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else {
        v.to_string()
    }
}

fn hex_encode(bytes: &[u8], out: &mut Vec<u8>) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    out.extend_from_slice(b"\\x");
    for b in bytes {
        out.push(DIGITS[usize::from(b >> 4)]);
        out.push(DIGITS[usize::from(b & 0x0f)]);
    }
}

/// Decode bytea hex output (`\x0a0b`).
pub(crate) fn hex_decode(text: &[u8]) -> Result<Vec<u8>> {
    let digits = text
        .strip_prefix(b"\\x")
        .ok_or_else(|| Error::Decode("bytea text must use hex format".into()))?;
    if digits.len() % 2 != 0 {
        return Err(Error::Decode("odd number of hex digits in bytea".into()));
    }
    let nibble = |c: u8| match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit {:?}", c as char))),
    };
    digits
        .chunks_exact(2)
        .map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

fn parse_text<T: std::str::FromStr>(ty: &TypeInfo, buf: &[u8]) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let s = utf8(buf)?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid {} {s:?}: {e}", ty.name)))
}

impl Codec for TextCodec {
    fn encode(
        &self,
        _ty: &TypeInfo,
        buf: &mut Vec<u8>,
        value: &Value,
        _ctx: &CodecContext,
    ) -> Result<()> {
        match value {
            Value::Null => {
                return Err(Error::InvalidUsage("NULL has no text encoding".into()));
            }
            Value::Bool(v) => buf.push(if *v { b't' } else { b'f' }),
            Value::Int2(v) => buf.extend_from_slice(v.to_string().as_bytes()),
            Value::Int4(v) => buf.extend_from_slice(v.to_string().as_bytes()),
            Value::Int8(v) => buf.extend_from_slice(v.to_string().as_bytes()),
            Value::Float4(v) => buf.extend_from_slice(float_text(f64::from(*v)).as_bytes()),
            Value::Float8(v) => buf.extend_from_slice(float_text(*v).as_bytes()),
            Value::Text(v) => buf.extend_from_slice(v.as_bytes()),
            Value::Bytes(v) => hex_encode(v, buf),
        }
        Ok(())
    }

    fn decode(&self, ty: &TypeInfo, buf: &[u8], ctx: &CodecContext) -> Result<Value> {
        Ok(match ty.oid {
            oid::BOOL => match buf {
                b"t" => Value::Bool(true),
                b"f" => Value::Bool(false),
                _ => return Err(Error::Decode(format!("invalid bool {buf:?}"))),
            },
            oid::INT2 => Value::Int2(parse_text(ty, buf)?),
            oid::INT4 => Value::Int4(parse_text(ty, buf)?),
            oid::INT8 => Value::Int8(parse_text(ty, buf)?),
            oid::OID => Value::Int8(i64::from(parse_text::<u32>(ty, buf)?)),
            oid::FLOAT4 => Value::Float4(parse_text(ty, buf)?),
            oid::FLOAT8 => Value::Float8(parse_text(ty, buf)?),
            oid::BYTEA => Value::Bytes(ctx.truncate_bytes(hex_decode(buf)?)),
            _ => Value::Text(ctx.truncate_text(utf8(buf)?.to_string())),
        })
    }
}

/// Decode one column value through the codec chosen for its type and format.
pub fn decode_value(
    type_ref: &TypeRef,
    format: FormatCode,
    raw: Option<&[u8]>,
    types: &TypeCache,
    codecs: &dyn CodecLookup,
    ctx: &CodecContext,
) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let ty = types.resolve(type_ref)?;
    let codec = match format {
        FormatCode::Binary => codecs.binary_codec(&ty),
        FormatCode::Text => codecs.text_codec(&ty),
    }
    .ok_or_else(|| Error::Unsupported(format!("no {format:?} codec for type {}", ty.name)))?;
    codec.decode(&ty, raw, ctx)
}

/// Bind parameter values encoded for the wire.
#[derive(Debug, Clone, Default)]
pub struct EncodedParams {
    formats: Vec<FormatCode>,
    data: Vec<u8>,
    ranges: Vec<Option<(usize, usize)>>,
}

impl EncodedParams {
    /// One format code per parameter.
    pub fn formats(&self) -> &[FormatCode] {
        &self.formats
    }

    /// Encoded values, `None` for NULL.
    pub fn values(&self) -> Vec<Option<&[u8]>> {
        self.ranges
            .iter()
            .map(|range| range.map(|(start, end)| &self.data[start..end]))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Encode `values` for the parameter types a statement reported.
///
/// Text values are sent in text format and left for the server to parse;
/// everything else uses the type's binary codec when there is one.
pub fn encode_params(
    param_types: &[TypeRef],
    values: &[Value],
    types: &TypeCache,
    codecs: &dyn CodecLookup,
    ctx: &CodecContext,
) -> Result<EncodedParams> {
    if param_types.len() != values.len() {
        return Err(Error::InvalidUsage(format!(
            "statement expects {} parameters, got {}",
            param_types.len(),
            values.len()
        )));
    }

    let mut params = EncodedParams::default();
    for (type_ref, value) in param_types.iter().zip(values) {
        if *value == Value::Null {
            params.formats.push(FormatCode::Text);
            params.ranges.push(None);
            continue;
        }

        let ty = types.resolve(type_ref)?;
        let binary = match value {
            Value::Text(_) => None,
            _ => codecs.binary_codec(&ty),
        };
        let (format, codec) = match binary {
            Some(codec) => (FormatCode::Binary, codec),
            None => (
                FormatCode::Text,
                codecs.text_codec(&ty).ok_or_else(|| {
                    Error::Unsupported(format!("no codec for parameter type {}", ty.name))
                })?,
            ),
        };

        let start = params.data.len();
        codec.encode(&ty, &mut params.data, value, ctx)?;
        params.formats.push(format);
        params.ranges.push(Some((start, params.data.len())));
    }
    Ok(params)
}

/// Result format per column: binary where a binary codec exists.
pub fn result_formats<'a>(
    columns: impl IntoIterator<Item = &'a TypeRef>,
    types: &TypeCache,
    codecs: &dyn CodecLookup,
) -> Vec<FormatCode> {
    columns
        .into_iter()
        .map(|type_ref| match types.resolve(type_ref) {
            Ok(ty) if codecs.binary_codec(&ty).is_some() => FormatCode::Binary,
            _ => FormatCode::Text,
        })
        .collect()
}
