use bytes::BufMut;
use futures::TryStreamExt;
use tracing::debug;
use warp::multipart::{FormData, Part};

use crate::error::{TransferError, TransferResult};

/// Fields of a multipart upload that the transfer endpoints understand.
#[derive(Debug, Default)]
pub struct Upload {
    pub file: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub table_name: Option<String>,
    pub columns: Vec<String>,
}

/// Drain a multipart form into memory.
///
/// `file` carries the CSV, `table_name` the destination, and `columns` may
/// appear several times, as a JSON array, or as a comma-separated list.
pub async fn collect(form: FormData) -> TransferResult<Upload> {
    let parts: Vec<Part> = form.try_collect().await.map_err(malformed)?;

    let mut upload = Upload::default();
    for part in parts {
        let name = part.name().to_string();
        let file_name = part.filename().map(str::to_string);
        let data = read_part(part).await?;
        match name.as_str() {
            "file" => {
                upload.file_name = file_name;
                upload.file = Some(data);
            }
            "table_name" => {
                upload.table_name = Some(String::from_utf8_lossy(&data).trim().to_string());
            }
            "columns" => upload
                .columns
                .extend(parse_columns(&String::from_utf8_lossy(&data))),
            other => debug!(field = other, "ignoring multipart field"),
        }
    }
    Ok(upload)
}

async fn read_part(part: Part) -> TransferResult<Vec<u8>> {
    part.stream()
        .try_fold(Vec::new(), |mut acc, buf| async move {
            acc.put(buf);
            Ok(acc)
        })
        .await
        .map_err(malformed)
}

fn malformed(err: warp::Error) -> TransferError {
    TransferError::InvalidInput(format!("malformed multipart body: {err}"))
}

pub fn parse_columns(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let items: Vec<String> = match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) if raw.starts_with('[') => list,
        _ => raw.split(',').map(str::to_string).collect(),
    };
    items
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}
