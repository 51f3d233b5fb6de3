//! Extended query protocol state machine.
//!
//! Requests are queued in a [`RequestQueue`], sent in one write, and the
//! responses are matched against the queue in order. Several statements
//! can be pipelined before a single Sync.

use std::collections::VecDeque;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::{Response, ResponseHandler};
use crate::protocol::backend::{
    CommandTag, DataRow, ErrorResponse, FieldDescription, ParameterDescription, RowDescription,
    expect_empty, parse_ready_for_query,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_close_statement, write_describe_portal,
    write_describe_statement, write_execute, write_flush, write_parse, write_sync,
};
use crate::protocol::tag::MessageTag;
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};
use crate::types::{TypeCache, TypeRef};

use super::action::Action;
use super::{HandlerSink, StateMachine, async_message, unexpected};

/// One result column.
#[derive(Debug, Clone)]
pub struct ResultField {
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Shared handle to the column type
    pub type_ref: TypeRef,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl ResultField {
    /// Build from a RowDescription entry, sharing the type handle in `types`.
    pub fn from_description(field: &FieldDescription<'_>, types: &TypeCache) -> Result<Self> {
        Ok(Self {
            name: field.name.to_string(),
            table_oid: field.table_oid(),
            column_id: field.column_id(),
            type_ref: types.get(field.type_oid()),
            type_size: field.type_size(),
            type_modifier: field.type_modifier(),
            format: field.format()?,
        })
    }

    pub fn type_oid(&self) -> Oid {
        self.type_ref.oid()
    }
}

/// Parse a RowDescription payload into result fields.
pub(crate) fn result_fields(payload: &[u8], types: &TypeCache) -> Result<Vec<ResultField>> {
    RowDescription::parse(payload)?
        .fields()
        .iter()
        .map(|field| ResultField::from_description(field, types))
        .collect()
}

/// Response the backend owes for a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    ParseComplete,
    ParameterDescription,
    RowDescriptionOrNoData,
    BindComplete,
    /// DataRow* then CommandComplete, PortalSuspended or EmptyQueryResponse
    ExecuteResult,
    CloseComplete,
    ReadyForQuery,
}

/// Frontend messages waiting to be sent, with the responses they will produce.
#[derive(Debug, Default)]
pub struct RequestQueue {
    buf: Vec<u8>,
    expected: VecDeque<Expected>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue Parse.
    pub fn parse(&mut self, statement: &str, query: &str, param_oids: &[Oid]) -> &mut Self {
        write_parse(&mut self.buf, statement, query, param_oids);
        self.expected.push_back(Expected::ParseComplete);
        self
    }

    /// Queue Describe(Statement): ParameterDescription then RowDescription or NoData.
    pub fn describe_statement(&mut self, statement: &str) -> &mut Self {
        write_describe_statement(&mut self.buf, statement);
        self.expected.push_back(Expected::ParameterDescription);
        self.expected.push_back(Expected::RowDescriptionOrNoData);
        self
    }

    /// Queue Bind with already encoded parameters.
    pub fn bind(
        &mut self,
        portal: &str,
        statement: &str,
        param_formats: &[FormatCode],
        params: &[Option<&[u8]>],
        result_formats: &[FormatCode],
    ) -> &mut Self {
        write_bind(
            &mut self.buf,
            portal,
            statement,
            param_formats,
            params,
            result_formats,
        );
        self.expected.push_back(Expected::BindComplete);
        self
    }

    /// Queue Describe(Portal).
    pub fn describe_portal(&mut self, portal: &str) -> &mut Self {
        write_describe_portal(&mut self.buf, portal);
        self.expected.push_back(Expected::RowDescriptionOrNoData);
        self
    }

    /// Queue Execute. `max_rows` 0 means no limit.
    pub fn execute(&mut self, portal: &str, max_rows: u32) -> &mut Self {
        write_execute(&mut self.buf, portal, max_rows);
        self.expected.push_back(Expected::ExecuteResult);
        self
    }

    pub fn close_statement(&mut self, statement: &str) -> &mut Self {
        write_close_statement(&mut self.buf, statement);
        self.expected.push_back(Expected::CloseComplete);
        self
    }

    pub fn close_portal(&mut self, portal: &str) -> &mut Self {
        write_close_portal(&mut self.buf, portal);
        self.expected.push_back(Expected::CloseComplete);
        self
    }

    /// Queue Flush. The backend sends nothing back for it.
    pub fn flush(&mut self) -> &mut Self {
        write_flush(&mut self.buf);
        self
    }

    /// Queue Sync.
    pub fn sync(&mut self) -> &mut Self {
        write_sync(&mut self.buf);
        self.expected.push_back(Expected::ReadyForQuery);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encoded frontend messages.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Extended query protocol state machine.
///
/// Reports every response to the handler. A backend ErrorResponse is held
/// back while the responses the backend discards are skipped; it is
/// returned once ReadyForQuery arrives, leaving the connection usable.
pub struct ExtendedQueryStateMachine<'a, H> {
    sink: HandlerSink<'a, H>,
    types: &'a TypeCache,
    requests: Vec<u8>,
    expected: VecDeque<Expected>,
    started: bool,
    /// `None` until a RowDescription (or `with_columns`) supplies them.
    columns: Option<Vec<ResultField>>,
    param_oids: Vec<Oid>,
    transaction_status: TransactionStatus,
    suspended: bool,
}

impl<'a, H: ResponseHandler> ExtendedQueryStateMachine<'a, H> {
    pub fn new(queue: RequestQueue, handler: &'a mut H, types: &'a TypeCache) -> Self {
        Self {
            sink: HandlerSink::new(handler),
            types,
            requests: queue.buf,
            expected: queue.expected,
            started: false,
            columns: None,
            param_oids: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            suspended: false,
        }
    }

    /// Columns to use for DataRows that arrive without a preceding
    /// RowDescription, as when executing a suspended portal again.
    pub fn with_columns(mut self, columns: Vec<ResultField>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Queue the requests for sending.
    ///
    /// The queue must end with Sync; otherwise the machine would wait for a
    /// ReadyForQuery that never comes.
    pub fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.started {
            return Err(Error::InvalidUsage("request queue already sent".into()));
        }
        if self.expected.back() != Some(&Expected::ReadyForQuery) {
            return Err(Error::InvalidUsage("request queue must end with Sync".into()));
        }
        buffer_set.write_buffer.append(&mut self.requests);
        self.started = true;
        Ok(Action::WriteAndReadMessage)
    }

    /// Columns of the last RowDescription (or those given to `with_columns`).
    pub fn columns(&self) -> &[ResultField] {
        self.columns.as_deref().unwrap_or_default()
    }

    pub fn take_columns(&mut self) -> Vec<ResultField> {
        self.columns.take().unwrap_or_default()
    }

    /// Parameter types from the last ParameterDescription.
    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn take_param_oids(&mut self) -> Vec<Oid> {
        std::mem::take(&mut self.param_oids)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// True if the last Execute stopped at its row limit.
    pub fn portal_suspended(&self) -> bool {
        self.suspended
    }

    fn handle_error(&mut self, payload: &[u8]) -> Result<Action> {
        let error = ErrorResponse::parse(payload)?.into_error();
        if error.is_connection_broken() {
            return Err(error);
        }
        tracing::debug!(sqlstate = ?error.sqlstate(), "statement failed, skipping to Sync");
        self.sink.fail(error);
        // The backend ignores everything up to the next Sync.
        while self
            .expected
            .front()
            .is_some_and(|e| *e != Expected::ReadyForQuery)
        {
            self.expected.pop_front();
        }
        Ok(Action::ReadMessage)
    }

    fn step_inner(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let msg = buffer_set.message()?;
        let payload = msg.payload;

        if msg.is_async() {
            return Ok(Action::HandleAsyncMessageAndReadMessage(async_message(msg)?));
        }
        if msg.tag == MessageTag::ErrorResponse {
            return self.handle_error(payload);
        }

        let Some(&expected) = self.expected.front() else {
            return Err(unexpected(msg.tag, "no response is pending"));
        };

        match (expected, msg.tag) {
            (Expected::ParseComplete, MessageTag::ParseComplete) => {
                expect_empty("ParseComplete", payload)?;
                self.expected.pop_front();
                self.sink.emit(Response::ParseComplete);
            }
            (Expected::ParameterDescription, MessageTag::ParameterDescription) => {
                self.param_oids = ParameterDescription::parse(payload)?.into_oids();
                self.expected.pop_front();
                self.sink
                    .emit(Response::ParameterDescription(&self.param_oids));
            }
            (Expected::RowDescriptionOrNoData, MessageTag::RowDescription) => {
                let fields = result_fields(payload, self.types)?;
                self.expected.pop_front();
                let columns = self.columns.insert(fields);
                self.sink.emit(Response::RowDescription(columns.as_slice()));
            }
            (Expected::RowDescriptionOrNoData, MessageTag::NoData) => {
                expect_empty("NoData", payload)?;
                self.columns = None;
                self.expected.pop_front();
                self.sink.emit(Response::NoData);
            }
            (Expected::BindComplete, MessageTag::BindComplete) => {
                expect_empty("BindComplete", payload)?;
                self.expected.pop_front();
                self.sink.emit(Response::BindComplete);
            }
            (Expected::ExecuteResult, MessageTag::DataRow) => {
                let row = DataRow::parse(payload)?;
                let Some(columns) = self.columns.as_deref() else {
                    return Err(Error::Protocol("DataRow without RowDescription".into()));
                };
                if row.len() != columns.len() {
                    return Err(Error::Protocol(format!(
                        "DataRow has {} columns, RowDescription has {}",
                        row.len(),
                        columns.len()
                    )));
                }
                self.sink.emit(Response::DataRow {
                    fields: columns,
                    row,
                });
            }
            (Expected::ExecuteResult, MessageTag::CommandComplete) => {
                let tag = CommandTag::parse_message(payload)?;
                self.suspended = false;
                self.expected.pop_front();
                self.sink.emit(Response::CommandComplete(&tag));
            }
            (Expected::ExecuteResult, MessageTag::PortalSuspended) => {
                expect_empty("PortalSuspended", payload)?;
                self.suspended = true;
                self.expected.pop_front();
                self.sink.emit(Response::PortalSuspended);
            }
            (Expected::ExecuteResult, MessageTag::EmptyQueryResponse) => {
                expect_empty("EmptyQueryResponse", payload)?;
                self.suspended = false;
                self.expected.pop_front();
                self.sink.emit(Response::EmptyQuery);
            }
            (Expected::CloseComplete, MessageTag::CloseComplete) => {
                expect_empty("CloseComplete", payload)?;
                self.expected.pop_front();
                self.sink.emit(Response::CloseComplete);
            }
            (Expected::ReadyForQuery, MessageTag::ReadyForQuery) => {
                self.transaction_status = parse_ready_for_query(payload)?;
                self.expected.pop_front();
                self.sink
                    .emit(Response::ReadyForQuery(self.transaction_status));
                if self.expected.is_empty() {
                    return self.sink.finish();
                }
            }
            (expected, tag) => return Err(unexpected(tag, expected)),
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: ResponseHandler> StateMachine for ExtendedQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        self.step_inner(buffer_set)
    }

    fn is_complete(&self) -> bool {
        self.started && self.expected.is_empty()
    }
}
