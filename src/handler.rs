//! Response events and stock handlers.
//!
//! A state machine reports every backend response it accepts as one
//! [`Response`] event, in wire order. A handler matches on the events it
//! cares about and ignores the rest.
//!
//! Event order for one `Bind`/`Describe`/`Execute` of a row-returning
//! statement:
//! ```text
//! BindComplete → RowDescription → DataRow* → CommandComplete
//! ```
//! A row-limited Execute ends with `PortalSuspended` instead of
//! `CommandComplete`; an empty query string ends with `EmptyQuery`.

use crate::error::Result;
use crate::protocol::backend::{CommandTag, DataRow};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::row::FromRow;
use crate::state::extended::ResultField;
use crate::types::{CodecContext, CodecLookup, TypeCache, Value, decode_value};

/// One backend response.
#[derive(Debug, Clone, Copy)]
pub enum Response<'a> {
    ParseComplete,
    /// Parameter types of a described statement
    ParameterDescription(&'a [Oid]),
    /// Result columns of a described statement or portal
    RowDescription(&'a [ResultField]),
    /// The described statement or portal returns no rows
    NoData,
    BindComplete,
    DataRow {
        fields: &'a [ResultField],
        row: DataRow<'a>,
    },
    CommandComplete(&'a CommandTag),
    /// Row limit reached; the portal can be executed again
    PortalSuspended,
    EmptyQuery,
    CloseComplete,
    ReadyForQuery(TransactionStatus),
}

/// Receives response events.
///
/// Returning an error stops delivery for the rest of the request; the
/// state machine still drains the stream to the next ReadyForQuery and then
/// reports the error.
pub trait ResponseHandler {
    fn handle(&mut self, response: Response<'_>) -> Result<()>;
}

impl<F: FnMut(Response<'_>) -> Result<()>> ResponseHandler for F {
    fn handle(&mut self, response: Response<'_>) -> Result<()> {
        self(response)
    }
}

/// Discards rows, keeps the last command tag.
#[derive(Debug, Default)]
pub struct DropHandler {
    last: Option<CommandTag>,
}

impl DropHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows affected by the last completed command.
    pub fn rows_affected(&self) -> Option<u64> {
        self.last.as_ref().and_then(|tag| tag.rows_affected)
    }

    /// Tag of the last completed command.
    pub fn command_tag(&self) -> Option<&CommandTag> {
        self.last.as_ref()
    }
}

impl ResponseHandler for DropHandler {
    fn handle(&mut self, response: Response<'_>) -> Result<()> {
        if let Response::CommandComplete(tag) = response {
            self.last = Some(tag.clone());
        }
        Ok(())
    }
}

/// Collects every row as `T`.
#[derive(Debug, Default)]
pub struct CollectHandler<T> {
    rows: Vec<T>,
}

impl<T> CollectHandler<T> {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: for<'a> FromRow<'a>> ResponseHandler for CollectHandler<T> {
    fn handle(&mut self, response: Response<'_>) -> Result<()> {
        if let Response::DataRow { fields, row } = response {
            self.rows.push(T::from_row(fields, row)?);
        }
        Ok(())
    }
}

/// Keeps only the first row.
#[derive(Debug, Default)]
pub struct FirstRowHandler<T> {
    row: Option<T>,
}

impl<T> FirstRowHandler<T> {
    pub fn new() -> Self {
        Self { row: None }
    }

    pub fn get(&self) -> Option<&T> {
        self.row.as_ref()
    }

    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: for<'a> FromRow<'a>> ResponseHandler for FirstRowHandler<T> {
    fn handle(&mut self, response: Response<'_>) -> Result<()> {
        if let Response::DataRow { fields, row } = response
            && self.row.is_none()
        {
            self.row = Some(T::from_row(fields, row)?);
        }
        Ok(())
    }
}

/// Decodes rows into [`Value`]s through a codec lookup.
///
/// Column types are resolved through `types` on first use, so this works
/// for any column the codecs can handle without knowing the row shape in
/// advance.
pub struct ValueHandler<'c> {
    types: &'c TypeCache,
    codecs: &'c dyn CodecLookup,
    ctx: CodecContext,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl<'c> ValueHandler<'c> {
    pub fn new(types: &'c TypeCache, codecs: &'c dyn CodecLookup, ctx: CodecContext) -> Self {
        Self {
            types,
            codecs,
            ctx,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Column names of the last row description.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

impl std::fmt::Debug for ValueHandler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueHandler")
            .field("columns", &self.columns)
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl ResponseHandler for ValueHandler<'_> {
    fn handle(&mut self, response: Response<'_>) -> Result<()> {
        match response {
            Response::RowDescription(fields) => {
                self.columns = fields.iter().map(|f| f.name.clone()).collect();
            }
            Response::DataRow { fields, row } => {
                let values = fields
                    .iter()
                    .zip(row.iter())
                    .map(|(field, raw)| {
                        decode_value(
                            &field.type_ref,
                            field.format,
                            raw,
                            self.types,
                            self.codecs,
                            &self.ctx,
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.rows.push(values);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_handler_keeps_last_tag() {
        let mut handler = DropHandler::new();
        let insert = CommandTag::parse("INSERT 0 3").unwrap();
        let update = CommandTag::parse("UPDATE 2").unwrap();
        handler.handle(Response::CommandComplete(&insert)).unwrap();
        handler.handle(Response::CommandComplete(&update)).unwrap();
        assert_eq!(handler.rows_affected(), Some(2));
        assert_eq!(handler.command_tag().unwrap().command, "UPDATE");
    }

    #[test]
    fn closures_are_handlers() {
        let mut seen = Vec::new();
        let mut handler = |response: Response<'_>| -> Result<()> {
            seen.push(format!("{response:?}"));
            Ok(())
        };
        handler.handle(Response::ParseComplete).unwrap();
        handler.handle(Response::BindComplete).unwrap();
        assert_eq!(seen, ["ParseComplete", "BindComplete"]);
    }
}
