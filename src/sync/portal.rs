//! Named portal for fetching rows in batches.

use std::io::{Read, Write};

use crate::error::Result;
use crate::handler::{CollectHandler, ResponseHandler};
use crate::row::FromRow;
use crate::state::extended::ResultField;

use super::Conn;

/// Handle to a named portal.
///
/// Created by [`Conn::exec_portal`] inside a transaction. Each
/// [`execute`](Self::execute) sends Execute with a row limit and no
/// Describe; the columns captured at bind time decode every batch.
///
/// ```ignore
/// let tx = conn.begin()?;
/// let mut portal = conn.exec_portal(&stmt, &[])?;
/// while !portal.is_complete() {
///     let rows: Vec<(i32,)> = portal.execute_collect(&mut conn, 100)?;
///     process(rows);
/// }
/// portal.close(&mut conn)?;
/// tx.commit(&mut conn)?;
/// ```
#[derive(Debug)]
pub struct Portal {
    name: String,
    columns: Vec<ResultField>,
    complete: bool,
}

impl Portal {
    pub(crate) fn new(name: String, columns: Vec<ResultField>) -> Self {
        Self {
            name,
            columns,
            complete: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ResultField] {
        &self.columns
    }

    /// True once an Execute ran to CommandComplete.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fetch up to `max_rows` rows (0 fetches everything left).
    pub fn execute<S: Read + Write, H: ResponseHandler>(
        &mut self,
        conn: &mut Conn<S>,
        max_rows: u32,
        handler: &mut H,
    ) -> Result<()> {
        let suspended = conn.execute_portal(&self.name, &self.columns, max_rows, handler)?;
        self.complete = !suspended;
        Ok(())
    }

    /// Fetch up to `max_rows` rows as `T`.
    pub fn execute_collect<S: Read + Write, T: for<'a> FromRow<'a>>(
        &mut self,
        conn: &mut Conn<S>,
        max_rows: u32,
    ) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.execute(conn, max_rows, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Close the portal on the server.
    pub fn close<S: Read + Write>(self, conn: &mut Conn<S>) -> Result<()> {
        conn.close_portal(&self.name)
    }
}
