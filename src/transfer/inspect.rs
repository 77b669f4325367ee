use tracing::debug;

use crate::error::{TransferError, TransferResult};
use crate::flatfile::{decode_lossy, header_of, reader};
use crate::warehouse::Warehouse;

pub fn list_tables(wh: &dyn Warehouse) -> TransferResult<Vec<String>> {
    wh.list_tables().map_err(TransferError::upstream)
}

/// Column names of `table`, type metadata dropped.
pub fn describe_table(wh: &dyn Warehouse, table: &str) -> TransferResult<Vec<String>> {
    let columns = wh.describe_table(table).map_err(TransferError::upstream)?;
    debug!(table, n = columns.len(), "described table");
    Ok(columns.into_iter().map(|c| c.name).collect())
}

/// Header of an uploaded CSV. Nothing is persisted.
pub fn flatfile_columns(file: Option<&[u8]>) -> TransferResult<Vec<String>> {
    let bytes = file.ok_or(TransferError::MissingInput("no file"))?;
    let text = decode_lossy(bytes);
    header_of(&mut reader(&text))
}
