//! Synchronous PostgreSQL client.

mod cancel;
mod conn;
mod portal;
mod stream;
mod transaction;

pub use cancel::CancelToken;
pub use conn::{Conn, Notification};
pub use portal::Portal;
pub use stream::Stream;
pub use transaction::Transaction;
