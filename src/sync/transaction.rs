//! Transaction support for synchronous connections.

use std::io::{Read, Write};

use super::Conn;
use crate::error::{Error, Result};

/// An open transaction block.
///
/// The connection is passed to `commit` and `rollback`, which check that it
/// is the one that began the transaction.
#[derive(Debug)]
pub struct Transaction {
    connection_id: u32,
}

impl Transaction {
    pub(crate) fn new(connection_id: u32) -> Self {
        Self { connection_id }
    }

    fn check<S: Read + Write>(&self, conn: &Conn<S>) -> Result<()> {
        let actual = conn.connection_id();
        if self.connection_id != actual {
            return Err(Error::InvalidUsage(format!(
                "connection mismatch: expected {}, got {}",
                self.connection_id, actual
            )));
        }
        Ok(())
    }

    /// Send COMMIT.
    pub fn commit<S: Read + Write>(self, conn: &mut Conn<S>) -> Result<()> {
        self.check(conn)?;
        conn.query_drop("COMMIT")?;
        Ok(())
    }

    /// Send ROLLBACK.
    pub fn rollback<S: Read + Write>(self, conn: &mut Conn<S>) -> Result<()> {
        self.check(conn)?;
        conn.query_drop("ROLLBACK")?;
        Ok(())
    }
}
