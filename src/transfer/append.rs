use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{TransferError, TransferResult};
use crate::flatfile::{decode_lossy, read_file_header, RecordSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendOutcome {
    pub appended_rows: usize,
    pub message: String,
}

/// Append the rows of an uploaded CSV to the reference ledger at `reference`.
///
/// The uploaded header must equal the reference header exactly, order
/// included. Nothing is written unless every check passes.
#[tracing::instrument(level = "info", skip(file, reference), fields(reference = %reference.display()))]
pub fn append_to_reference(
    file: Option<&[u8]>,
    reference: &Path,
) -> TransferResult<AppendOutcome> {
    let bytes = file.ok_or(TransferError::MissingInput("no file"))?;
    let uploaded = RecordSet::parse_csv(&decode_lossy(bytes))?;

    if !reference.is_file() {
        warn!("reference file is missing");
        return Err(TransferError::ReferenceFileMissing(reference.to_path_buf()));
    }
    let reference_header = read_file_header(reference)?;

    let uploaded = match uploaded {
        Some(set) if set.header() == reference_header => set,
        other => {
            return Err(TransferError::HeaderMismatch {
                uploaded: other.map(|s| s.header()).unwrap_or_default(),
                reference: reference_header,
            })
        }
    };

    uploaded.append_to_file(reference)?;

    let name = reference
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| reference.display().to_string());
    info!(rows = uploaded.num_rows(), "appended to reference");
    Ok(AppendOutcome {
        appended_rows: uploaded.num_rows(),
        message: format!("Appended {} rows to {}", uploaded.num_rows(), name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const REFERENCE: &str = "id,name,price,in_stock\n1,Apple,0.5,1\n";

    #[test]
    fn appends_rows_in_reference_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("product.csv");
        fs::write(&path, REFERENCE).unwrap();

        let upload: &[u8] = b"id,name,price,in_stock\n2,Banana,0.3,1\n3,\"Cherry, dark\",1.0,0\n";
        let outcome = append_to_reference(Some(upload), &path).unwrap();

        assert_eq!(outcome.appended_rows, 2);
        assert_eq!(outcome.message, "Appended 2 rows to product.csv");
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "id,name,price,in_stock\n1,Apple,0.5,1\n2,Banana,0.3,1\n3,\"Cherry, dark\",1.0,0\n"
        );
    }

    #[test]
    fn reordered_header_leaves_reference_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("product.csv");
        fs::write(&path, REFERENCE).unwrap();
        let before = fs::read(&path).unwrap();

        let upload: &[u8] = b"name,id,price,in_stock\nBanana,2,0.3,1\n";
        let err = append_to_reference(Some(upload), &path).unwrap_err();

        assert!(matches!(err, TransferError::HeaderMismatch { .. }), "{err:?}");
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn empty_upload_is_a_header_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("product.csv");
        fs::write(&path, REFERENCE).unwrap();

        let err = append_to_reference(Some(&b""[..]), &path).unwrap_err();
        match err {
            TransferError::HeaderMismatch { uploaded, .. } => assert!(uploaded.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_reference_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("product.csv");

        let err = append_to_reference(Some(&b"id\n1\n"[..]), &path).unwrap_err();
        assert!(matches!(err, TransferError::ReferenceFileMissing(_)));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_and_ragged_rows_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("product.csv");
        fs::write(&path, REFERENCE).unwrap();

        assert!(matches!(
            append_to_reference(None, &path),
            Err(TransferError::MissingInput("no file"))
        ));
        assert!(matches!(
            append_to_reference(Some(&b"id,name,price,in_stock\n2,Banana\n"[..]), &path),
            Err(TransferError::InvalidInput(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), REFERENCE);
    }
}
