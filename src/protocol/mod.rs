//! PostgreSQL wire protocol implementation.
//!
//! # Structure
//!
//! - `backend`: Server → Client messages (parsing)
//! - `frontend`: Client → Server messages (encoding)
//! - `codec`: Low-level encoding/decoding primitives
//! - `tag`: The closed set of backend message tags
//! - `framing`: Reading and writing whole messages over a byte stream
//! - `types`: Common protocol types (FormatCode, Oid, TransactionStatus)

pub mod backend;
pub mod codec;
pub mod framing;
pub mod frontend;
pub mod tag;
pub mod types;

pub use backend::RawMessage;
pub use framing::{Framed, MessageBody};
pub use tag::MessageTag;
pub use types::{FormatCode, Oid, TransactionStatus};
