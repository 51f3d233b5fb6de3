//! Prepared statements and statement references for `exec_*` methods.

use crate::protocol::types::Oid;
use crate::state::extended::ResultField;
use crate::types::TypeRef;

/// A statement prepared on the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Statement name (empty for the unnamed statement)
    pub name: String,
    /// Parameter types from ParameterDescription
    pub param_types: Vec<TypeRef>,
    /// Result columns, empty if the statement returns no rows
    pub columns: Vec<ResultField>,
}

impl PreparedStatement {
    pub fn param_oids(&self) -> Vec<Oid> {
        self.param_types.iter().map(TypeRef::oid).collect()
    }

    /// True if the statement returns rows.
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Something `exec_*` methods can run: a prepared statement or raw SQL.
///
/// This trait is sealed and cannot be implemented outside this crate.
pub trait IntoStatement: private::Sealed {
    /// Get the SQL string if this is raw SQL (needs Parse first).
    fn as_sql(&self) -> Option<&str>;

    /// Get the prepared statement if this is a prepared statement reference.
    fn as_prepared(&self) -> Option<&PreparedStatement>;
}

mod private {
    use super::PreparedStatement;

    pub trait Sealed {}

    impl Sealed for &PreparedStatement {}
    impl Sealed for &str {}
}

impl IntoStatement for &PreparedStatement {
    fn as_sql(&self) -> Option<&str> {
        None
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        Some(self)
    }
}

impl IntoStatement for &str {
    fn as_sql(&self) -> Option<&str> {
        Some(self)
    }

    fn as_prepared(&self) -> Option<&PreparedStatement> {
        None
    }
}
