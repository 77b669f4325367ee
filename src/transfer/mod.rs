//! The data-movement operations.
//!
//! Each function is synchronous and runs to completion; the HTTP layer calls
//! them on the blocking pool with an injected [`Warehouse`](crate::warehouse::Warehouse).

pub mod append;
pub mod export;
pub mod import;
pub mod inspect;

pub use append::{append_to_reference, AppendOutcome};
pub use export::{export_to_csv, ExportOutcome};
pub use import::{import_csv, ImportOutcome, ImportRequest};
pub use inspect::{describe_table, flatfile_columns, list_tables};
