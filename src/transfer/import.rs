use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::error::{TransferError, TransferResult};
use crate::flatfile::{decode_lossy, header_of, reader, Row};
use crate::warehouse::Warehouse;

/// An uploaded CSV plus the destination for a subset of its columns.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub file: Option<Vec<u8>>,
    pub table_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub ingested_rows: usize,
    pub message: String,
}

/// Load `columns` of the uploaded CSV into `table_name` with one bulk insert.
///
/// Validation runs in full before anything is written: the columns must
/// exist both in the CSV header and in the destination table.
#[tracing::instrument(level = "info", skip(wh, req), fields(table = %req.table_name))]
pub fn import_csv(wh: &dyn Warehouse, req: &ImportRequest) -> TransferResult<ImportOutcome> {
    let bytes = req
        .file
        .as_deref()
        .ok_or(TransferError::MissingInput("no file"))?;
    if req.table_name.is_empty() {
        return Err(TransferError::MissingInput("no table"));
    }
    if req.columns.is_empty() {
        return Err(TransferError::MissingInput("no columns"));
    }
    let table = req.table_name.as_str();
    let mut seen = HashSet::new();
    if let Some(dup) = req
        .columns
        .iter()
        .find(|c| !seen.insert(c.to_ascii_lowercase()))
    {
        return Err(TransferError::InvalidInput(format!(
            "column '{dup}' requested more than once"
        )));
    }

    let text = decode_lossy(bytes);
    let mut rdr = reader(&text);
    let header = header_of(&mut rdr)?;
    require_columns(&req.columns, &header, "CSV file")?;

    if let Err(e) = wh.probe_table(table) {
        warn!(error = %e, "destination probe failed");
        return Err(TransferError::TableNotFound(table.to_string()));
    }
    let table_columns: Vec<String> = wh
        .describe_table(table)
        .map_err(TransferError::upstream)?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let targets = table_targets(&req.columns, &table_columns, table)?;

    // Position of each requested column in the CSV record; first match wins
    // for duplicated header names.
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, name) in header.iter().enumerate() {
        position.entry(name.as_str()).or_insert(i);
    }
    let picks: Vec<usize> = req.columns.iter().map(|c| position[c.as_str()]).collect();

    let mut rows: Vec<Row> = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(
            picks
                .iter()
                .map(|&i| record.get(i).map(str::to_string))
                .collect(),
        );
    }

    if rows.is_empty() {
        info!("no data rows after header");
        return Ok(ImportOutcome {
            ingested_rows: 0,
            message: "No data found in the CSV to ingest for the selected columns.".into(),
        });
    }

    wh.bulk_insert(table, &targets, &rows)
        .map_err(TransferError::upstream)?;

    info!(rows = rows.len(), "import complete");
    Ok(ImportOutcome {
        ingested_rows: rows.len(),
        message: format!("Successfully ingested {} rows into '{}'.", rows.len(), table),
    })
}

fn require_columns(
    requested: &[String],
    available: &[String],
    source: &str,
) -> TransferResult<()> {
    if requested.iter().all(|c| available.contains(c)) {
        return Ok(());
    }
    Err(TransferError::ColumnMismatch {
        source_name: source.to_string(),
        requested: requested.to_vec(),
        available: available.to_vec(),
    })
}

/// Table spelling of each requested column. DuckDB matches column names
/// without regard to case.
fn table_targets(
    requested: &[String],
    table_columns: &[String],
    table: &str,
) -> TransferResult<Vec<String>> {
    requested
        .iter()
        .map(|c| {
            table_columns
                .iter()
                .find(|t| t.eq_ignore_ascii_case(c))
                .cloned()
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| TransferError::ColumnMismatch {
            source_name: format!("table '{table}'"),
            requested: requested.to_vec(),
            available: table_columns.to_vec(),
        })
}
