//! Core of a PostgreSQL frontend: wire protocol, SCRAM authentication and a
//! blocking connection driver.
//!
//! # Layers
//!
//! - [`protocol`]: message encoding and zero-copy parsing
//! - [`scram`] and [`saslprep`]: SCRAM-SHA-1/SHA-256 client with channel binding
//! - [`state`]: sans-I/O state machines for startup, simple and extended query
//! - [`types`] and [`row`]: type resolution, value codecs and row decoding
//! - [`sync`]: a blocking connection over TCP or a Unix socket
//!
//! # Example
//!
//! ```no_run
//! use pgcore::sync::Conn;
//! use pgcore::{Opts, Value};
//!
//! fn main() -> pgcore::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::new(opts)?;
//!
//!     let stmt = conn.prepare("greet", "SELECT $1::int4 + 1, 'hello'")?;
//!     let rows: Vec<(i32, String)> = conn.exec_collect(&stmt, &[Value::Int4(41)])?;
//!     println!("Rows: {:?}", rows);
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer_set;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod row;
pub mod saslprep;
pub mod scram;
pub mod state;
pub mod statement;
pub mod types;

#[cfg(feature = "sync")]
pub mod sync;

pub use buffer_set::BufferSet;
pub use error::{Error, ErrorFields, Result};
pub use handler::{
    CollectHandler, DropHandler, FirstRowHandler, Response, ResponseHandler, ValueHandler,
};
pub use opts::{ChannelBinding, Opts};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use row::{FromRow, FromValue};
pub use state::extended::{RequestQueue, ResultField};
pub use statement::{IntoStatement, PreparedStatement};
pub use types::{CodecContext, TypeCache, TypeRef, Value};
