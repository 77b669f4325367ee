use anyhow::{anyhow, bail, Context, Result};
use duckdb::{appender_params_from_iter, params, Connection};
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info};

use super::{quote_ident, ColumnInfo, Warehouse};
use crate::flatfile::Row;

/// [`Warehouse`] backed by a single DuckDB connection.
pub struct DuckWarehouse {
    conn: Mutex<Connection>,
}

impl DuckWarehouse {
    /// Open a DuckDB database on disk at `path`, creating the file if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening DuckDB at {}", path.display()))?;
        Ok(Self::from_connection(conn))
    }

    /// Open a DuckDB in‐memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory DuckDB")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("DuckDB connection mutex poisoned"))
    }
}

/// Catalog spelling of `table`. DuckDB resolves identifiers case-insensitively.
fn resolve_table(conn: &Connection, table: &str) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables
         WHERE table_schema = current_schema() AND lower(table_name) = lower(?)",
    )?;
    let mut rows = stmt.query(params![table])?;
    match rows.next()? {
        Some(row) => Ok(row.get(0)?),
        None => bail!("Table with name {table} does not exist"),
    }
}

impl Warehouse for DuckWarehouse {
    fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = current_schema()
             ORDER BY table_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<duckdb::Result<Vec<_>>>()
            .context("listing tables")?;
        Ok(names)
    }

    fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns
             WHERE table_schema = current_schema() AND lower(table_name) = lower(?)
             ORDER BY ordinal_position",
        )?;
        let columns = stmt
            .query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .with_context(|| format!("describing table {table}"))?;
        if columns.is_empty() {
            bail!("Table with name {table} does not exist");
        }
        Ok(columns)
    }

    fn select_columns(&self, table: &str, columns: &[String]) -> Result<Vec<Row>> {
        let projection = columns
            .iter()
            .map(|c| format!("CAST({} AS VARCHAR)", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {projection} FROM {}", quote_ident(table));
        debug!(%sql, "select");

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("preparing select from {table}"))?;
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Option<String>>(i))
                    .collect::<duckdb::Result<Row>>()
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .with_context(|| format!("reading rows from {table}"))?;
        Ok(rows)
    }

    fn probe_table(&self, table: &str) -> Result<()> {
        let sql = format!("SELECT 1 FROM {} LIMIT 0", quote_ident(table));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        Ok(())
    }

    fn bulk_insert(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let table = resolve_table(&conn, table)?;
        let targets: Vec<&str> = columns.iter().map(String::as_str).collect();

        // Appender buffers may flush mid-load; the transaction keeps the load all-or-nothing.
        let tx = conn.transaction().context("starting bulk insert")?;
        {
            let mut appender = tx
                .appender_with_columns(&table, &targets)
                .with_context(|| format!("opening appender on {table}"))?;
            appender
                .append_rows(rows.iter().map(|row| appender_params_from_iter(row.iter())))
                .with_context(|| format!("appending {} rows to {table}", rows.len()))?;
            appender
                .flush()
                .with_context(|| format!("flushing rows into {table}"))?;
        }
        tx.commit()
            .with_context(|| format!("committing rows into {table}"))?;

        info!(table = %table, inserted = rows.len(), "bulk insert");
        Ok(rows.len())
    }

    fn setup_sample_table(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS products (
                id INTEGER,
                name VARCHAR,
                price DOUBLE,
                in_stock UTINYINT
            );",
        )
        .context("creating products table")?;

        let existing: i64 =
            conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
        if existing == 0 {
            conn.execute_batch(
                "INSERT INTO products (id, name, price, in_stock) VALUES
                    (1, 'Apple', 0.5, 1),
                    (2, 'Banana', 0.3, 1),
                    (3, 'Cherry', 1.0, 0);",
            )
            .context("seeding products table")?;
            info!("seeded products sample table");
        }
        Ok(())
    }
}
