//! Simple query protocol state machine.
//!
//! Only used for bootstrap and transaction-control statements; results are
//! always text format.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::{Response, ResponseHandler};
use crate::protocol::backend::{
    CommandTag, DataRow, ErrorResponse, expect_empty, parse_ready_for_query,
};
use crate::protocol::frontend::write_query;
use crate::protocol::tag::MessageTag;
use crate::protocol::types::TransactionStatus;
use crate::types::TypeCache;

use super::action::Action;
use super::extended::{ResultField, result_fields};
use super::{HandlerSink, StateMachine, async_message, unexpected};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    Finished,
}

/// Simple query protocol state machine.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    sink: HandlerSink<'a, H>,
    types: &'a TypeCache,
    columns: Vec<ResultField>,
    transaction_status: TransactionStatus,
}

impl<'a, H: ResponseHandler> SimpleQueryStateMachine<'a, H> {
    pub fn new(handler: &'a mut H, types: &'a TypeCache) -> Self {
        Self {
            state: State::Initial,
            sink: HandlerSink::new(handler),
            types,
            columns: Vec::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Transaction status from the final ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Queue the Query message.
    pub fn start(&mut self, buffer_set: &mut BufferSet, query: &str) -> Action {
        write_query(&mut buffer_set.write_buffer, query);
        self.state = State::WaitingResponse;
        Action::WriteAndReadMessage
    }

    fn step_inner(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let msg = buffer_set.message()?;
        let payload = msg.payload;

        if msg.is_async() {
            return Ok(Action::HandleAsyncMessageAndReadMessage(async_message(msg)?));
        }
        if self.state != State::WaitingResponse {
            return Err(unexpected(msg.tag, self.state));
        }

        match msg.tag {
            MessageTag::RowDescription => {
                self.columns = result_fields(payload, self.types)?;
                self.sink.emit(Response::RowDescription(&self.columns));
            }
            MessageTag::DataRow => {
                let row = DataRow::parse(payload)?;
                if row.len() != self.columns.len() {
                    return Err(Error::Protocol(format!(
                        "DataRow has {} columns, RowDescription has {}",
                        row.len(),
                        self.columns.len()
                    )));
                }
                self.sink.emit(Response::DataRow {
                    fields: &self.columns,
                    row,
                });
            }
            MessageTag::CommandComplete => {
                let tag = CommandTag::parse_message(payload)?;
                self.columns.clear();
                self.sink.emit(Response::CommandComplete(&tag));
            }
            MessageTag::EmptyQueryResponse => {
                expect_empty("EmptyQueryResponse", payload)?;
                self.sink.emit(Response::EmptyQuery);
            }
            MessageTag::ErrorResponse => {
                let error = ErrorResponse::parse(payload)?.into_error();
                if error.is_connection_broken() {
                    return Err(error);
                }
                // ReadyForQuery still follows.
                self.sink.fail(error);
            }
            MessageTag::ReadyForQuery => {
                self.transaction_status = parse_ready_for_query(payload)?;
                self.sink
                    .emit(Response::ReadyForQuery(self.transaction_status));
                self.state = State::Finished;
                return self.sink.finish();
            }
            tag => return Err(unexpected(tag, self.state)),
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: ResponseHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        self.step_inner(buffer_set)
    }

    fn is_complete(&self) -> bool {
        self.state == State::Finished
    }
}
