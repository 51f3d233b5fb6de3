//! Message framing over a byte stream.
//!
//! Backend messages are `[tag][length: i32, includes itself][payload]`.
//! [`Framed::receive`] hands the payload to a handler as a bounded reader and
//! always consumes whatever the handler left unread, so the next read starts
//! at the next message boundary even when the handler fails.

use std::io::{self, Read, Write};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u8};
use crate::protocol::tag::MessageTag;

/// Largest payload accepted from the server (1 GiB, the backend's own limit).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 0x4000_0000;

/// A byte stream split into protocol messages.
#[derive(Debug)]
pub struct Framed<S> {
    stream: S,
    max_message_length: usize,
}

impl<S: Read + Write> Framed<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    /// Cap on the payload length of a single backend message.
    pub fn with_max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Write already-encoded frontend messages and flush.
    ///
    /// Several messages may be passed at once; they reach the server as one
    /// pipelined write.
    pub fn send(&mut self, messages: &[u8]) -> Result<()> {
        tracing::debug!(bytes = messages.len(), "-> send");
        self.stream.write_all(messages)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one message and pass its body to `handler`.
    ///
    /// Unread payload bytes are skipped before returning, whether the handler
    /// succeeded or not. A handler error takes precedence over a failure while
    /// skipping.
    pub fn receive<T, F>(&mut self, handler: F) -> Result<T>
    where
        F: FnOnce(MessageTag, &mut MessageBody<'_, S>) -> Result<T>,
    {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header)?;
        let (tag_byte, rest) = read_u8(&header)?;
        let (length, _) = read_i32(rest)?;

        if length < 4 {
            return Err(Error::Protocol(format!(
                "invalid message length {length} for tag {:?}",
                tag_byte as char
            )));
        }
        let payload_len = (length - 4) as usize;
        if payload_len > self.max_message_length {
            return Err(Error::Protocol(format!(
                "message length {payload_len} exceeds limit {}",
                self.max_message_length
            )));
        }

        let mut body = MessageBody {
            stream: &mut self.stream,
            length: payload_len,
            remaining: payload_len,
        };

        let Some(tag) = MessageTag::from_byte(tag_byte) else {
            body.skip_remaining()?;
            return Err(Error::Protocol(format!(
                "unrecognized message tag {:?}",
                tag_byte as char
            )));
        };
        tracing::debug!(%tag, length = payload_len, "<- message");

        let result = handler(tag, &mut body);
        let unread = body.remaining;
        let skipped = body.skip_remaining();
        if unread > 0 && result.is_ok() {
            tracing::debug!(%tag, unread, "skipped unread payload");
        }

        let value = result?;
        skipped?;
        Ok(value)
    }

    /// Read one message into `buffer_set.read_buffer` and record its tag.
    pub fn read_message_into(&mut self, buffer_set: &mut BufferSet) -> Result<MessageTag> {
        buffer_set.tag = None;
        let tag = self.receive(|tag, body| {
            buffer_set.read_buffer.clear();
            buffer_set.read_buffer.resize(body.len(), 0);
            body.read_exact(&mut buffer_set.read_buffer)?;
            Ok(tag)
        })?;
        buffer_set.tag = Some(tag);
        Ok(tag)
    }
}

/// The payload of one backend message, readable up to its declared length.
#[derive(Debug)]
pub struct MessageBody<'a, S> {
    stream: &'a mut S,
    length: usize,
    remaining: usize,
}

impl<S: Read> MessageBody<'_, S> {
    /// Declared payload length.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Bytes read so far.
    pub fn consumed(&self) -> usize {
        self.length - self.remaining
    }

    fn skip_remaining(&mut self) -> io::Result<()> {
        let expected = self.remaining as u64;
        let skipped = io::copy(self, &mut io::sink())?;
        if skipped != expected {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }
}

impl<S: Read> Read for MessageBody<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(self.remaining);
        if limit == 0 {
            return Ok(0);
        }
        let n = self.stream.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a message",
            ));
        }
        self.remaining -= n;
        Ok(n)
    }
}
