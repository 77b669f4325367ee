use serde::Serialize;
use std::{collections::HashSet, path::Path};
use tracing::info;

use crate::error::{TransferError, TransferResult};
use crate::flatfile::RecordSet;
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportOutcome {
    pub record_count: usize,
}

/// Read `columns` of `table` and replace the CSV at `out_path` with them.
///
/// The database is authoritative on column names; a bad name surfaces as
/// an upstream error and the previous export is left in place.
#[tracing::instrument(level = "info", skip(wh, out_path), fields(out = %out_path.display()))]
pub fn export_to_csv(
    wh: &dyn Warehouse,
    table: &str,
    columns: &[String],
    out_path: &Path,
) -> TransferResult<ExportOutcome> {
    if table.is_empty() {
        return Err(TransferError::MissingInput("no table"));
    }
    if columns.is_empty() {
        return Err(TransferError::MissingInput("no columns"));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(TransferError::InvalidInput(format!(
            "column '{dup}' requested more than once"
        )));
    }

    let rows = wh
        .select_columns(table, columns)
        .map_err(TransferError::upstream)?;
    let set = RecordSet::from_rows(columns, &rows)?;
    set.write_csv_file(out_path)?;

    info!(rows = set.num_rows(), "export written");
    Ok(ExportOutcome {
        record_count: set.num_rows(),
    })
}
