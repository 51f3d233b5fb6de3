//! PostgreSQL backend (server → client) messages.

pub mod auth;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{
    AuthenticationMessage, BackendKeyData, NegotiateProtocolVersion, NotificationResponse,
    ParameterStatus, parse_ready_for_query,
};
pub use error::{ErrorResponse, NoticeResponse, parse_fields};
pub use extended::{ParameterDescription, expect_empty};
pub use query::{CommandTag, DataRow, DataRowIter, FieldDescription, RowDescription};

use super::tag::MessageTag;

/// One backend message: its tag and the payload after the length field.
///
/// Individual message types are parsed on demand by state machines.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    pub tag: MessageTag,
    pub payload: &'a [u8],
}

impl<'a> RawMessage<'a> {
    pub fn new(tag: MessageTag, payload: &'a [u8]) -> Self {
        Self { tag, payload }
    }

    /// Check if this is an async message (can arrive at any time).
    pub fn is_async(&self) -> bool {
        self.tag.is_async()
    }
}
