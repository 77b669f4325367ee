use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use warp::{
    http::StatusCode,
    multipart::FormData,
    reply::{Reply, Response},
    Rejection,
};

use super::{form, AppState};
use crate::auth::Claims;
use crate::error::{TransferError, TransferResult};
use crate::transfer::{self, ImportRequest};

const SUCCESS: &str = "success";

#[derive(Serialize)]
struct TokenBody {
    access_token: String,
    token_type: &'static str,
}

#[derive(Serialize)]
struct MessageBody {
    status: &'static str,
    message: String,
}

#[derive(Serialize)]
struct TablesBody {
    status: &'static str,
    tables: Vec<String>,
}

#[derive(Serialize)]
struct ColumnsBody {
    status: &'static str,
    columns: Vec<String>,
}

#[derive(Serialize)]
struct UploadColumnsBody {
    columns: Vec<String>,
}

#[derive(Serialize)]
struct ExportBody {
    status: &'static str,
    record_count: usize,
}

#[derive(Serialize)]
struct IngestBody {
    status: &'static str,
    ingested_rows: usize,
    message: String,
}

/// JSON body of `POST /ingest/database-to-flatfile`.
#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

pub fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    warp::reply::with_status(
        warp::reply::json(&MessageBody {
            status: "error",
            message: message.into(),
        }),
        status,
    )
    .into_response()
}

fn respond<T: Serialize>(result: TransferResult<T>) -> Response {
    match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                error!(error = %err, "request failed");
            } else {
                warn!(error = %err, "request rejected");
            }
            error_reply(status, err.to_string())
        }
    }
}

/// Run blocking database or filesystem work off the reactor.
async fn blocking<T, F>(f: F) -> TransferResult<T>
where
    F: FnOnce() -> TransferResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Internal(format!("worker task failed: {e}")))?
}

pub async fn health() -> Result<Response, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "flatbridge"
    }))
    .into_response())
}

pub async fn issue_token(state: AppState) -> Result<Response, Rejection> {
    match state.keys.issue(&state.config.token_subject) {
        Ok(access_token) => {
            info!(sub = %state.config.token_subject, "issued token");
            Ok(warp::reply::json(&TokenBody {
                access_token,
                token_type: "bearer",
            })
            .into_response())
        }
        Err(e) => {
            error!(error = %e, "token issuance failed");
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn setup_sample(claims: Claims, state: AppState) -> Result<Response, Rejection> {
    debug!(sub = %claims.sub, "setup sample table");
    let wh = state.warehouse.clone();
    let result = blocking(move || {
        wh.setup_sample_table().map_err(TransferError::upstream)?;
        Ok(MessageBody {
            status: SUCCESS,
            message: "Sample table created and data inserted".into(),
        })
    })
    .await;
    Ok(respond(result))
}

pub async fn list_tables(claims: Claims, state: AppState) -> Result<Response, Rejection> {
    debug!(sub = %claims.sub, "list tables");
    let wh = state.warehouse.clone();
    let result = blocking(move || transfer::list_tables(wh.as_ref()))
        .await
        .map(|tables| TablesBody {
            status: SUCCESS,
            tables,
        });
    Ok(respond(result))
}

pub async fn table_columns(
    table: String,
    claims: Claims,
    state: AppState,
) -> Result<Response, Rejection> {
    debug!(sub = %claims.sub, %table, "describe table");
    let wh = state.warehouse.clone();
    let result = blocking(move || transfer::describe_table(wh.as_ref(), &table))
        .await
        .map(|columns| ColumnsBody {
            status: SUCCESS,
            columns,
        });
    Ok(respond(result))
}

pub async fn export(
    claims: Claims,
    state: AppState,
    req: ExportRequest,
) -> Result<Response, Rejection> {
    debug!(sub = %claims.sub, table = %req.table_name, "export");
    let wh = state.warehouse.clone();
    let out = state.config.export_csv.clone();
    let result = blocking(move || {
        transfer::export_to_csv(wh.as_ref(), &req.table_name, &req.columns, &out)
    })
    .await
    .map(|outcome| ExportBody {
        status: SUCCESS,
        record_count: outcome.record_count,
    });
    Ok(respond(result))
}

pub async fn upload_csv(claims: Claims, form: FormData) -> Result<Response, Rejection> {
    let result = async {
        let upload = form::collect(form).await?;
        debug!(sub = %claims.sub, file = ?upload.file_name, "upload csv");
        transfer::flatfile_columns(upload.file.as_deref())
    }
    .await
    .map(|columns| UploadColumnsBody { columns });
    Ok(respond(result))
}

pub async fn append_reference(
    claims: Claims,
    state: AppState,
    form: FormData,
) -> Result<Response, Rejection> {
    let result = async {
        let upload = form::collect(form).await?;
        debug!(sub = %claims.sub, file = ?upload.file_name, "append to reference");
        let reference = state.config.reference_csv.clone();
        blocking(move || transfer::append_to_reference(upload.file.as_deref(), &reference)).await
    }
    .await
    .map(|outcome| MessageBody {
        status: SUCCESS,
        message: outcome.message,
    });
    Ok(respond(result))
}

pub async fn import(
    claims: Claims,
    state: AppState,
    form: FormData,
) -> Result<Response, Rejection> {
    let result = async {
        let upload = form::collect(form).await?;
        debug!(sub = %claims.sub, file = ?upload.file_name, "import csv");
        let req = ImportRequest {
            file: upload.file,
            table_name: upload.table_name.unwrap_or_default(),
            columns: upload.columns,
        };
        let wh = state.warehouse.clone();
        blocking(move || transfer::import_csv(wh.as_ref(), &req)).await
    }
    .await
    .map(|outcome| IngestBody {
        status: SUCCESS,
        ingested_rows: outcome.ingested_rows,
        message: outcome.message,
    });
    Ok(respond(result))
}
