//! Buffer set shared between the I/O driver and the state machines.

use crate::error::{Error, Result};
use crate::protocol::backend::RawMessage;
use crate::protocol::tag::MessageTag;

/// Buffers owned by a connection and lent to a state machine on every step.
///
/// The driver reads one backend message into `read_buffer` (setting `tag`),
/// and sends whatever a state machine appended to `write_buffer`.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read
    pub read_buffer: Vec<u8>,
    /// Frontend messages waiting to be sent
    pub write_buffer: Vec<u8>,
    /// Tag of the last message read
    pub tag: Option<MessageTag>,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            tag: None,
        }
    }

    /// The last message read.
    pub fn message(&self) -> Result<RawMessage<'_>> {
        let tag = self
            .tag
            .ok_or_else(|| Error::Protocol("no message has been read".into()))?;
        Ok(RawMessage::new(tag, &self.read_buffer))
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
