use std::path::PathBuf;

use thiserror::Error;
use warp::http::StatusCode;

/// Failures surfaced by the transfer operations.
///
/// Every variant is returned to the caller as-is with a status derived from
/// [`TransferError::status`]; nothing here is retried.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("selected columns {requested:?} not found in {source_name}. Available columns: {available:?}")]
    ColumnMismatch {
        source_name: String,
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("table '{0}' does not exist in the database")]
    TableNotFound(String),

    #[error("uploaded file's columns {uploaded:?} do not match reference columns {reference:?}")]
    HeaderMismatch {
        uploaded: Vec<String>,
        reference: Vec<String>,
    },

    #[error("reference file {} does not exist", .0.display())]
    ReferenceFileMissing(PathBuf),

    #[error("database query failed: {0}")]
    UpstreamQuery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Client errors are 400, upstream and local faults are 500.
    pub fn status(&self) -> StatusCode {
        match self {
            TransferError::MissingInput(_)
            | TransferError::InvalidInput(_)
            | TransferError::ColumnMismatch { .. }
            | TransferError::TableNotFound(_)
            | TransferError::HeaderMismatch { .. }
            | TransferError::ReferenceFileMissing(_) => StatusCode::BAD_REQUEST,
            TransferError::UpstreamQuery(_) | TransferError::Io(_) | TransferError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wrap an adapter failure, keeping the whole context chain in the message.
    pub fn upstream(err: anyhow::Error) -> Self {
        TransferError::UpstreamQuery(format!("{err:#}"))
    }
}

impl From<csv::Error> for TransferError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(io) = err.into_kind() {
                return TransferError::Io(io);
            }
            return TransferError::Internal("csv I/O error without source".into());
        }
        TransferError::InvalidInput(format!("malformed CSV: {err}"))
    }
}

impl From<arrow::error::ArrowError> for TransferError {
    fn from(err: arrow::error::ArrowError) -> Self {
        match err {
            arrow::error::ArrowError::IoError(_, io) => TransferError::Io(io),
            other => TransferError::InvalidInput(format!("malformed tabular data: {other}")),
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
