//! What a state machine asks its driver to do next.

use crate::error::ErrorFields;

/// I/O request returned from [`StateMachine::step`](super::StateMachine::step).
#[derive(Debug)]
pub enum Action {
    /// Read the next backend message into the buffer set, then step again.
    ReadMessage,

    /// Flush `buffer_set.write_buffer` to the server, then read.
    WriteAndReadMessage,

    /// Deliver this message to the connection (notice callback,
    /// notification queue or server parameters), then read.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// Nothing left to read for this request.
    Finished,
}

/// A backend message that is not part of any request's response.
///
/// The backend may interleave these with any response, even between two
/// DataRows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncMessage {
    /// NotificationResponse from LISTEN/NOTIFY
    Notification {
        /// Process ID of the notifying backend
        pid: u32,
        channel: String,
        payload: String,
    },

    /// NoticeResponse
    Notice(ErrorFields),

    /// ParameterStatus reported after startup, e.g. after `SET TimeZone`
    ParameterChanged { name: String, value: String },
}
