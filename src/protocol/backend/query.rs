//! Result-set backend messages: RowDescription, DataRow, CommandComplete.

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_nullable_bytes, read_u16};
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Field name
    pub name: &'a str,
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> Result<FormatCode> {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_fields, mut data) = read_u16(payload)?;
        let mut fields = Vec::with_capacity(num_fields as usize);

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = FieldDescriptionTail::ref_from_prefix(rest)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow message - contains a single row of data.
///
/// Column values are checked for framing at parse time, so iteration
/// cannot fail.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_u16(payload)?;

        let mut rest = columns_data;
        for _ in 0..num_columns {
            (_, rest) = read_nullable_bytes(rest)?;
        }
        if !rest.is_empty() {
            return Err(Error::Protocol(format!(
                "DataRow: {} trailing bytes",
                rest.len()
            )));
        }

        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values. `None` is SQL NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }

    /// Column value by index: `None` if out of range, `Some(None)` for NULL.
    pub fn get(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.iter().nth(index)
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let (value, rest) = read_nullable_bytes(self.remaining).ok()?;
        self.remaining = rest;
        Some(value)
    }
}

/// Verbs whose tag is `<verb> <rows>`.
const ROW_COUNT_VERBS: [&str; 6] = ["SELECT", "UPDATE", "DELETE", "MOVE", "FETCH", "MERGE"];

/// Parsed CommandComplete tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    /// Command name, e.g. `INSERT` or `CREATE TABLE`
    pub command: String,
    /// Rows affected, when the tag reports it
    pub rows_affected: Option<u64>,
    /// OID of the inserted row (`INSERT` only)
    pub inserted_oid: Option<Oid>,
}

impl CommandTag {
    /// Parse a command tag.
    ///
    /// Row-reporting verbs must have exactly the documented shape; anything
    /// else is an error rather than a guess. Other commands keep the full
    /// tag as their name.
    pub fn parse(tag: &str) -> Result<Self> {
        let parts: Vec<&str> = tag.split(' ').collect();
        let bad = || Error::Protocol(format!("malformed command tag {tag:?}"));
        let number = |s: &str| s.parse::<u64>().map_err(|_| bad());

        let (command, rows_affected, inserted_oid) = match parts.as_slice() {
            [""] => return Err(bad()),
            ["INSERT", oid, rows] => (
                "INSERT",
                Some(number(rows)?),
                Some(oid.parse::<Oid>().map_err(|_| bad())?),
            ),
            ["INSERT", ..] => return Err(bad()),
            ["COPY"] => ("COPY", None, None),
            ["COPY", rows] => ("COPY", Some(number(rows)?), None),
            ["COPY", ..] => return Err(bad()),
            [verb, rows] if ROW_COUNT_VERBS.contains(verb) => (*verb, Some(number(rows)?), None),
            [verb, ..] if ROW_COUNT_VERBS.contains(verb) => return Err(bad()),
            _ => (tag, None, None),
        };

        Ok(Self {
            command: command.to_string(),
            rows_affected,
            inserted_oid,
        })
    }

    /// Parse the payload of a CommandComplete message.
    pub fn parse_message(payload: &[u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Self::parse(tag)
    }
}
