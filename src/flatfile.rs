//! CSV helpers shared by the transfer operations.
//!
//! Parsing goes through the `csv` crate; a fully materialized record set is
//! held as an Arrow `RecordBatch` of `Utf8` columns and written back out with
//! the Arrow CSV writer.

use arrow::{
    array::{ArrayRef, StringArray},
    csv::WriterBuilder,
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use csv::{ReaderBuilder, StringRecord};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Arc,
};

use crate::error::{TransferError, TransferResult};

/// A row of text values aligned to some column list; `None` is SQL NULL / empty.
pub type Row = Vec<Option<String>>;

/// Decode uploaded bytes as UTF-8, dropping any undecodable sequences and a
/// leading byte-order mark.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    match out.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => out,
    }
}

/// A CSV reader over `text` with the header row enabled.
///
/// Flexible so callers can decide how to treat short or long records.
pub fn reader(text: &str) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// Header of a CSV reader; empty input yields an empty header.
pub fn header_of<R: Read>(rdr: &mut csv::Reader<R>) -> TransferResult<Vec<String>> {
    Ok(rdr.headers()?.iter().map(str::to_string).collect())
}

/// Header of the CSV file at `path`.
pub fn read_file_header(path: &Path) -> TransferResult<Vec<String>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
    header_of(&mut rdr)
}

/// Materialized tabular record set: an ordered header plus rows that all
/// share exactly that header.
#[derive(Debug, Clone)]
pub struct RecordSet {
    batch: RecordBatch,
}

impl RecordSet {
    /// Build from rows aligned to `header`.
    pub fn from_rows(header: &[String], rows: &[Row]) -> TransferResult<Self> {
        if header.is_empty() {
            return Err(TransferError::InvalidInput("record set has no columns".into()));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != header.len()) {
            return Err(TransferError::InvalidInput(format!(
                "row {} has {} fields, expected {}",
                i + 1,
                row.len(),
                header.len()
            )));
        }

        let fields: Vec<Field> = header
            .iter()
            .map(|n| Field::new(n, DataType::Utf8, true))
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields));

        let columns: Vec<ArrayRef> = (0..header.len())
            .map(|c| {
                Arc::new(StringArray::from_iter(rows.iter().map(|r| r[c].as_deref())))
                    as ArrayRef
            })
            .collect();

        Ok(Self {
            batch: RecordBatch::try_new(schema, columns)?,
        })
    }

    /// Parse CSV text, requiring every record to match the header width.
    ///
    /// Returns `None` when the text has no header at all.
    pub fn parse_csv(text: &str) -> TransferResult<Option<Self>> {
        let mut rdr = reader(text);
        let header = header_of(&mut rdr)?;
        if header.is_empty() {
            return Ok(None);
        }

        let mut rows = Vec::new();
        let mut record = StringRecord::new();
        while rdr.read_record(&mut record)? {
            if record.len() != header.len() {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(TransferError::InvalidInput(format!(
                    "line {line} has {} fields, header has {}",
                    record.len(),
                    header.len()
                )));
            }
            rows.push(record.iter().map(|v| Some(v.to_string())).collect());
        }

        Self::from_rows(&header, &rows).map(Some)
    }

    pub fn header(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Write as CSV, with or without the header line.
    pub fn write_csv<W: Write>(&self, out: W, with_header: bool) -> TransferResult<()> {
        let mut writer = WriterBuilder::new().with_header(with_header).build(out);
        writer.write(&self.batch)?;
        Ok(())
    }

    /// Replace the file at `path` with this record set, header included.
    ///
    /// Written to `<path>.tmp` then renamed, so readers never observe a
    /// half-written file.
    pub fn write_csv_file(&self, path: &Path) -> TransferResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        let file = File::create(&tmp)?;
        self.write_csv(&file, true)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append the data rows (no header) to the existing file at `path`.
    pub fn append_to_file(&self, path: &Path) -> TransferResult<()> {
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        if !ends_with_newline(&mut file)? {
            file.write_all(b"\n")?;
        }
        self.write_csv(&file, false)?;
        file.flush()?;
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
