//! Statically typed row materialization.
//!
//! A row is decoded by position into a tuple whose element types implement
//! [`FromValue`]. Each implementation checks the column's type OID and
//! rejects types it does not understand.

use crate::error::{Error, Result};
use crate::protocol::backend::DataRow;
use crate::protocol::types::{FormatCode, Oid};
use crate::state::extended::ResultField;
use crate::types::oid;

/// Decode one column value into a Rust type.
pub trait FromValue<'a>: Sized {
    /// Decode SQL NULL.
    ///
    /// Fails unless overridden; `Option<T>` overrides it.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode text format bytes.
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self>;

    /// Decode binary format bytes.
    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self>;
}

/// Decode a whole row.
pub trait FromRow<'a>: Sized {
    fn from_row(fields: &[ResultField], row: DataRow<'a>) -> Result<Self>;
}

/// Decode one column through `T`'s [`FromValue`] impl.
pub fn decode_column<'a, T: FromValue<'a>>(
    field: &ResultField,
    value: Option<&'a [u8]>,
) -> Result<T> {
    match value {
        None => T::from_null(),
        Some(bytes) => match field.format {
            FormatCode::Text => T::from_text(field.type_oid(), bytes),
            FormatCode::Binary => T::from_binary(field.type_oid(), bytes),
        },
    }
}

fn mismatch(oid: Oid, target: &str) -> Error {
    Error::Decode(format!("cannot decode oid {oid} as {target}"))
}

fn text(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn parse<T: std::str::FromStr>(bytes: &[u8], target: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    text(bytes)?
        .parse()
        .map_err(|e| Error::Decode(format!("invalid {target}: {e}")))
}

fn fixed<const N: usize>(bytes: &[u8], target: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {target} length: {}", bytes.len())))
}

fn is_text_oid(oid: Oid) -> bool {
    matches!(
        oid,
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::UNKNOWN
    )
}

impl FromValue<'_> for bool {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(mismatch(oid, "bool"));
        }
        match bytes {
            b"t" => Ok(true),
            b"f" => Ok(false),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BOOL {
            return Err(mismatch(oid, "bool"));
        }
        Ok(fixed::<1>(bytes, "bool")?[0] != 0)
    }
}

impl FromValue<'_> for i16 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::INT2 {
            return Err(mismatch(oid, "i16"));
        }
        parse(bytes, "i16")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::INT2 {
            return Err(mismatch(oid, "i16"));
        }
        Ok(i16::from_be_bytes(fixed(bytes, "i16")?))
    }
}

impl FromValue<'_> for i32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::INT2 | oid::INT4) {
            return Err(mismatch(oid, "i32"));
        }
        parse(bytes, "i32")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::INT2 => Ok(i32::from(i16::from_be_bytes(fixed(bytes, "i16")?))),
            oid::INT4 => Ok(i32::from_be_bytes(fixed(bytes, "i32")?)),
            _ => Err(mismatch(oid, "i32")),
        }
    }
}

impl FromValue<'_> for i64 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::INT2 | oid::INT4 | oid::INT8 | oid::OID) {
            return Err(mismatch(oid, "i64"));
        }
        parse(bytes, "i64")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::INT2 => Ok(i64::from(i16::from_be_bytes(fixed(bytes, "i16")?))),
            oid::INT4 => Ok(i64::from(i32::from_be_bytes(fixed(bytes, "i32")?))),
            oid::OID => Ok(i64::from(u32::from_be_bytes(fixed(bytes, "oid")?))),
            oid::INT8 => Ok(i64::from_be_bytes(fixed(bytes, "i64")?)),
            _ => Err(mismatch(oid, "i64")),
        }
    }
}

impl FromValue<'_> for f32 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::FLOAT4 {
            return Err(mismatch(oid, "f32"));
        }
        parse(bytes, "f32")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::FLOAT4 {
            return Err(mismatch(oid, "f32"));
        }
        Ok(f32::from_be_bytes(fixed(bytes, "f32")?))
    }
}

impl FromValue<'_> for f64 {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if !matches!(oid, oid::FLOAT4 | oid::FLOAT8) {
            return Err(mismatch(oid, "f64"));
        }
        parse(bytes, "f64")
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        match oid {
            oid::FLOAT4 => Ok(f64::from(f32::from_be_bytes(fixed(bytes, "f32")?))),
            oid::FLOAT8 => Ok(f64::from_be_bytes(fixed(bytes, "f64")?)),
            _ => Err(mismatch(oid, "f64")),
        }
    }
}

impl<'a> FromValue<'a> for &'a str {
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if !is_text_oid(oid) {
            return Err(mismatch(oid, "str"));
        }
        text(bytes)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        Self::from_text(oid, bytes)
    }
}

impl FromValue<'_> for String {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        <&str>::from_text(oid, bytes).map(str::to_owned)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        <&str>::from_binary(oid, bytes).map(str::to_owned)
    }
}

impl<'a> FromValue<'a> for &'a [u8] {
    /// Only binary bytea borrows; text bytea is hex and needs `Vec<u8>`.
    fn from_text(oid: Oid, _bytes: &'a [u8]) -> Result<Self> {
        Err(mismatch(oid, "borrowed bytes from text format"))
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(mismatch(oid, "bytes"));
        }
        Ok(bytes)
    }
}

impl FromValue<'_> for Vec<u8> {
    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        if oid != oid::BYTEA {
            return Err(mismatch(oid, "Vec<u8>"));
        }
        crate::types::hex_decode(bytes)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        <&[u8]>::from_binary(oid, bytes).map(<[u8]>::to_vec)
    }
}

impl<'a, T: FromValue<'a>> FromValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(oid, bytes).map(Some)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(oid, bytes).map(Some)
    }
}

macro_rules! impl_from_row_for_tuple {
    ($count:literal; $($t:ident),+) => {
        impl<'a, $($t: FromValue<'a>),+> FromRow<'a> for ($($t,)+) {
            fn from_row(fields: &[ResultField], row: DataRow<'a>) -> Result<Self> {
                if fields.len() != $count || row.len() != $count {
                    return Err(Error::Decode(format!(
                        "expected {} columns, got {} (row has {})",
                        $count,
                        fields.len(),
                        row.len()
                    )));
                }
                let mut fields = fields.iter();
                let mut values = row.iter();
                Ok(($(
                    {
                        let (Some(field), Some(value)) = (fields.next(), values.next()) else {
                            return Err(Error::Decode("row ended early".into()));
                        };
                        decode_column::<$t>(field, value)?
                    },
                )+))
            }
        }
    };
}

impl_from_row_for_tuple!(1; T1);
impl_from_row_for_tuple!(2; T1, T2);
impl_from_row_for_tuple!(3; T1, T2, T3);
impl_from_row_for_tuple!(4; T1, T2, T3, T4);
impl_from_row_for_tuple!(5; T1, T2, T3, T4, T5);
impl_from_row_for_tuple!(6; T1, T2, T3, T4, T5, T6);
impl_from_row_for_tuple!(7; T1, T2, T3, T4, T5, T6, T7);
impl_from_row_for_tuple!(8; T1, T2, T3, T4, T5, T6, T7, T8);
