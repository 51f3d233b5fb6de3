//! ErrorResponse and NoticeResponse.
//!
//! Both carry the same repeated `(field tag byte, CString)` list ended by a
//! zero byte.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::{read_cstr, read_u8};

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    /// Internal position
    pub const INTERNAL_POSITION: u8 = b'p';
    /// Internal query
    pub const INTERNAL_QUERY: u8 = b'q';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Data type name
    pub const DATA_TYPE: u8 = b'd';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
    /// File name
    pub const FILE: u8 = b'F';
    /// Line number
    pub const LINE: u8 = b'L';
    /// Routine name
    pub const ROUTINE: u8 = b'R';
}

/// Parse error/notice fields. Unknown field tags are read and dropped.
pub fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    loop {
        let (tag, rest) = read_u8(data)?;
        if tag == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let text = || Some(value.to_string());
        match tag {
            field_type::SEVERITY => fields.severity = text(),
            field_type::SEVERITY_NON_LOCALIZED => fields.severity_non_localized = text(),
            field_type::CODE => fields.code = text(),
            field_type::MESSAGE => fields.message = text(),
            field_type::DETAIL => fields.detail = text(),
            field_type::HINT => fields.hint = text(),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = text(),
            field_type::WHERE => fields.where_ = text(),
            field_type::SCHEMA => fields.schema = text(),
            field_type::TABLE => fields.table = text(),
            field_type::COLUMN => fields.column = text(),
            field_type::DATA_TYPE => fields.data_type = text(),
            field_type::CONSTRAINT => fields.constraint = text(),
            field_type::FILE => fields.file = text(),
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = text(),
            other => {
                tracing::warn!(field = %(other as char), "discarding unknown error field");
            }
        }
    }

    Ok(fields)
}

/// ErrorResponse message.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ErrorFields);

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// NoticeResponse message.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ErrorFields);

impl NoticeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }
}
