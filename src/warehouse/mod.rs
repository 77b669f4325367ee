// src/warehouse/mod.rs
use anyhow::Result;

use crate::flatfile::Row;

pub mod duck;

pub use duck::DuckWarehouse;

/// One column as reported by the database's describe capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Database adapter used by the transfer operations.
///
/// Implementations are blocking; callers run them off the async reactor.
pub trait Warehouse: Send + Sync {
    /// Names of all tables visible to the connection.
    fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of `table` in declared order, table name matched case-insensitively.
    /// Errors if the table does not exist.
    fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// `SELECT columns FROM table`, values rendered as text.
    fn select_columns(&self, table: &str, columns: &[String]) -> Result<Vec<Row>>;

    /// Zero-row query against `table`; errors if it cannot be read.
    fn probe_table(&self, table: &str) -> Result<()>;

    /// Insert all `rows` into `table` as one batch: every row lands or none do.
    /// Returns rows inserted.
    fn bulk_insert(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<usize>;

    /// Create and seed the fixed `products` sample table.
    fn setup_sample_table(&self) -> Result<()>;
}

/// Quote an identifier for interpolation into SQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
