//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next.

pub mod action;
pub mod connection;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::{ExtendedQueryStateMachine, RequestQueue};
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::{Response, ResponseHandler};
use crate::protocol::backend::{NoticeResponse, NotificationResponse, ParameterStatus, RawMessage};
use crate::protocol::tag::MessageTag;

/// A protocol phase driven one backend message at a time.
pub trait StateMachine {
    /// Process the message in `buffer_set` and say what to do next.
    ///
    /// Anything appended to `buffer_set.write_buffer` must be sent when the
    /// returned action is [`Action::WriteAndReadMessage`].
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// True once the machine has seen everything it was waiting for.
    fn is_complete(&self) -> bool;
}

/// Decode a message that can arrive in any phase.
pub(crate) fn async_message(msg: RawMessage<'_>) -> Result<AsyncMessage> {
    match msg.tag {
        MessageTag::NoticeResponse => {
            let NoticeResponse(fields) = NoticeResponse::parse(msg.payload)?;
            Ok(AsyncMessage::Notice(fields))
        }
        MessageTag::ParameterStatus => {
            let param = ParameterStatus::parse(msg.payload)?;
            Ok(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        MessageTag::NotificationResponse => {
            let notification = NotificationResponse::parse(msg.payload)?;
            Ok(AsyncMessage::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            })
        }
        tag => Err(Error::Protocol(format!("{tag} is not an asynchronous message"))),
    }
}

/// Error for a message that the current phase does not expect.
pub(crate) fn unexpected(tag: MessageTag, phase: impl std::fmt::Debug) -> Error {
    Error::Protocol(format!("unexpected {tag} while {phase:?}"))
}

/// Delivers events to a handler until the first error.
///
/// After a failure the machine keeps reading to ReadyForQuery and reports
/// the stored error then, so the stream stays aligned.
pub(crate) struct HandlerSink<'a, H> {
    handler: &'a mut H,
    error: Option<Error>,
}

impl<'a, H: ResponseHandler> HandlerSink<'a, H> {
    pub(crate) fn new(handler: &'a mut H) -> Self {
        Self {
            handler,
            error: None,
        }
    }

    pub(crate) fn emit(&mut self, response: Response<'_>) {
        if self.error.is_none()
            && let Err(e) = self.handler.handle(response)
        {
            self.error = Some(e);
        }
    }

    /// Keep the first error only.
    pub(crate) fn fail(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }

    pub(crate) fn finish(&mut self) -> Result<Action> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(Action::Finished),
        }
    }
}
