//! HTTP surface.
//!
//! Every route except `/health` and `/token` sits behind the bearer filter,
//! which runs before any request body is read.

use anyhow::Result;
use std::{convert::Infallible, sync::Arc};
use tracing::{error, warn};
use warp::{
    http::StatusCode,
    reply::{Reply, Response},
    Filter, Rejection,
};

use crate::auth::{AuthError, Claims, TokenKeys};
use crate::config::Config;
use crate::warehouse::Warehouse;

pub mod form;
pub mod handlers;

const JSON_BODY_LIMIT: u64 = 64 * 1024;

/// Shared per-request context: the injected adapter plus settings.
#[derive(Clone)]
pub struct AppState {
    pub warehouse: Arc<dyn Warehouse>,
    pub config: Arc<Config>,
    pub keys: TokenKeys,
    cors_origin: String,
}

impl AppState {
    pub fn new(config: Config, warehouse: Arc<dyn Warehouse>) -> Result<Self> {
        let cors_origin = config.cors_origin()?;
        let keys = TokenKeys::new(&config.jwt_secret, config.token_ttl_minutes);
        Ok(Self {
            warehouse,
            config: Arc::new(config),
            keys,
            cors_origin,
        })
    }
}

#[derive(Debug)]
pub struct Unauthorized(pub AuthError);

impl warp::reject::Reject for Unauthorized {}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Extract and verify the bearer token, rejecting with [`Unauthorized`].
fn with_auth(keys: TokenKeys) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let keys = keys.clone();
        async move {
            keys.authorize(header.as_deref()).map_err(|e| {
                warn!(error = %e, "unauthorized request");
                warp::reject::custom(Unauthorized(e))
            })
        }
    })
}

/// All routes with CORS, request tracing and rejection handling applied.
pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let auth = with_auth(state.keys.clone());
    let upload_limit = state.config.max_upload_bytes;

    let health = warp::path!("health")
        .and(warp::get())
        .and_then(handlers::health);

    let token = warp::path!("token")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handlers::issue_token);

    let setup = warp::path!("setup-sample-table")
        .and(warp::post())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::setup_sample);

    let tables = warp::path!("connect" / "database")
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::list_tables);

    let columns = warp::path!("database" / String / "columns")
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::table_columns);

    let export = warp::path!("ingest" / "database-to-flatfile")
        .and(warp::post())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and_then(handlers::export);

    let upload = warp::path!("upload" / "csv")
        .and(warp::post())
        .and(auth.clone())
        .and(warp::multipart::form().max_length(upload_limit))
        .and_then(handlers::upload_csv);

    let append = warp::path!("append-to-reference-csv")
        .and(warp::post())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and(warp::multipart::form().max_length(upload_limit))
        .and_then(handlers::append_reference);

    let import = warp::path!("ingest" / "flatfile-to-database")
        .and(warp::post())
        .and(auth)
        .and(with_state(state.clone()))
        .and(warp::multipart::form().max_length(upload_limit))
        .and_then(handlers::import);

    let cors = warp::cors()
        .allow_origin(state.cors_origin.as_str())
        .allow_credentials(true)
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["authorization", "content-type"]);

    health
        .or(token)
        .or(setup)
        .or(tables)
        .or(columns)
        .or(export)
        .or(upload)
        .or(append)
        .or(import)
        .recover(handle_rejection)
        .with(cors)
        .with(warp::trace::request())
}

/// Map rejections to the same `{status, message}` body the handlers use.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if let Some(Unauthorized(e)) = err.find::<Unauthorized>() {
        let reply = handlers::error_reply(StatusCode::UNAUTHORIZED, e.to_string());
        return Ok(warp::reply::with_header(reply, "www-authenticate", "Bearer").into_response());
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if let Some(e) = err.find::<warp::reject::UnsupportedMediaType>() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::LengthRequired>() {
        (StatusCode::LENGTH_REQUIRED, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(handlers::error_reply(status, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::warehouse::DuckWarehouse;
    use chrono::Utc;
    use serde_json::Value;
    use std::{fs, path::PathBuf};
    use tempfile::{tempdir, TempDir};
    use warp::test::request;

    const BOUNDARY: &str = "flatbridge-test-boundary";

    struct Harness {
        _dir: TempDir,
        state: AppState,
        reference: PathBuf,
        export: PathBuf,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let reference = dir.path().join("product.csv");
        let export = dir.path().join("output.csv");
        fs::write(&reference, "id,name,price,in_stock\n1,Apple,0.5,1\n").unwrap();

        let wh = DuckWarehouse::open_in_memory().unwrap();
        wh.setup_sample_table().unwrap();
        wh.execute_batch("CREATE TABLE inventory (sku VARCHAR, name VARCHAR);")
            .unwrap();

        let config = Config {
            reference_csv: reference.clone(),
            export_csv: export.clone(),
            jwt_secret: "server-test-secret".into(),
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(wh)).unwrap();
        Harness {
            _dir: dir,
            state,
            reference,
            export,
        }
    }

    fn bearer(state: &AppState) -> String {
        format!("Bearer {}", state.keys.issue("tester").unwrap())
    }

    fn expired_bearer(state: &AppState) -> String {
        let now = Utc::now().timestamp();
        let token = state
            .keys
            .sign(&Claims {
                sub: "tester".into(),
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        format!("Bearer {token}")
    }

    /// Hand-built multipart body: `(field, filename, content)`.
    fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match filename {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: text/csv\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body.into_bytes()
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let h = harness();
        let res = request()
            .method("GET")
            .path("/health")
            .reply(&routes(h.state.clone()))
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(json(res.body())["status"], "healthy");
    }

    #[tokio::test]
    async fn issued_token_opens_protected_routes() {
        let h = harness();
        let api = routes(h.state.clone());

        let res = request().method("POST").path("/token").reply(&api).await;
        assert_eq!(res.status(), 200);
        let body = json(res.body());
        assert_eq!(body["token_type"], "bearer");
        let token = body["access_token"].as_str().unwrap().to_string();

        let res = request()
            .method("GET")
            .path("/connect/database")
            .header("authorization", format!("Bearer {token}"))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        let body = json(res.body());
        assert_eq!(body["status"], "success");
        assert_eq!(body["tables"], serde_json::json!(["inventory", "products"]));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let h = harness();
        let res = request()
            .method("GET")
            .path("/connect/database")
            .reply(&routes(h.state.clone()))
            .await;
        assert_eq!(res.status(), 401);
        assert_eq!(res.headers()["www-authenticate"], "Bearer");
        assert_eq!(json(res.body())["status"], "error");
    }

    #[tokio::test]
    async fn expired_token_has_no_side_effects() {
        let h = harness();
        let api = routes(h.state.clone());
        let auth = expired_bearer(&h.state);

        let res = request()
            .method("POST")
            .path("/ingest/database-to-flatfile")
            .header("authorization", auth.as_str())
            .json(&serde_json::json!({"table_name": "products", "columns": ["id"]}))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 401);
        assert!(json(res.body())["message"]
            .as_str()
            .unwrap()
            .contains("expired"));
        assert!(!h.export.exists());

        let before = fs::read(&h.reference).unwrap();
        let res = request()
            .method("POST")
            .path("/append-to-reference-csv")
            .header("authorization", auth.as_str())
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(multipart(&[(
                "file",
                Some("more.csv"),
                "id,name,price,in_stock\n2,Banana,0.3,1\n",
            )]))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 401);
        assert_eq!(fs::read(&h.reference).unwrap(), before);
    }

    #[tokio::test]
    async fn describes_table_columns() {
        let h = harness();
        let api = routes(h.state.clone());
        let auth = bearer(&h.state);

        let res = request()
            .method("GET")
            .path("/database/products/columns")
            .header("authorization", auth.as_str())
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(
            json(res.body())["columns"],
            serde_json::json!(["id", "name", "price", "in_stock"])
        );

        let res = request()
            .method("GET")
            .path("/database/PRODUCTS/columns")
            .header("authorization", auth.as_str())
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(json(res.body())["columns"][0], "id");

        let res = request()
            .method("GET")
            .path("/database/ghost/columns")
            .header("authorization", auth.as_str())
            .reply(&api)
            .await;
        assert_eq!(res.status(), 500);
    }

    #[tokio::test]
    async fn exports_products_to_csv() {
        let h = harness();
        let res = request()
            .method("POST")
            .path("/ingest/database-to-flatfile")
            .header("authorization", bearer(&h.state))
            .json(&serde_json::json!({"table_name": "products", "columns": ["id", "name", "price"]}))
            .reply(&routes(h.state.clone()))
            .await;
        assert_eq!(res.status(), 200);
        let body = json(res.body());
        assert_eq!(body["status"], "success");
        assert_eq!(body["record_count"], 3);
        assert_eq!(
            fs::read_to_string(&h.export).unwrap(),
            "id,name,price\n1,Apple,0.5\n2,Banana,0.3\n3,Cherry,1.0\n"
        );
    }

    #[tokio::test]
    async fn upload_lists_csv_columns() {
        let h = harness();
        let res = request()
            .method("POST")
            .path("/upload/csv")
            .header("authorization", bearer(&h.state))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(multipart(&[("file", Some("a.csv"), "sku,name,qty\nW-1,Widget,4\n")]))
            .reply(&routes(h.state.clone()))
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(
            json(res.body())["columns"],
            serde_json::json!(["sku", "name", "qty"])
        );
    }

    #[tokio::test]
    async fn append_checks_header_order() {
        let h = harness();
        let api = routes(h.state.clone());
        let auth = bearer(&h.state);
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");

        let res = request()
            .method("POST")
            .path("/append-to-reference-csv")
            .header("authorization", auth.as_str())
            .header("content-type", content_type.as_str())
            .body(multipart(&[(
                "file",
                Some("more.csv"),
                "id,name,price,in_stock\n2,Banana,0.3,1\n3,Cherry,1.0,0\n",
            )]))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(
            json(res.body())["message"],
            "Appended 2 rows to product.csv"
        );

        let before = fs::read(&h.reference).unwrap();
        let res = request()
            .method("POST")
            .path("/append-to-reference-csv")
            .header("authorization", auth.as_str())
            .header("content-type", content_type.as_str())
            .body(multipart(&[(
                "file",
                Some("swapped.csv"),
                "name,id,price,in_stock\nDate,4,2.0,1\n",
            )]))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 400);
        assert_eq!(json(res.body())["status"], "error");
        assert_eq!(fs::read(&h.reference).unwrap(), before);
        assert_eq!(
            String::from_utf8(before).unwrap().lines().count(),
            4,
            "header plus three rows"
        );
    }

    #[tokio::test]
    async fn imports_multipart_csv() {
        let h = harness();
        let api = routes(h.state.clone());
        let auth = bearer(&h.state);
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");

        let res = request()
            .method("POST")
            .path("/ingest/flatfile-to-database")
            .header("authorization", auth.as_str())
            .header("content-type", content_type.as_str())
            .body(multipart(&[
                ("file", Some("stock.csv"), "qty,sku,name\n4,W-1,Widget\n9,G-2,Gadget\n"),
                ("table_name", None, "inventory"),
                ("columns", None, r#"["sku", "name"]"#),
            ]))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        let body = json(res.body());
        assert_eq!(body["ingested_rows"], 2);
        assert_eq!(
            body["message"],
            "Successfully ingested 2 rows into 'inventory'."
        );

        let res = request()
            .method("POST")
            .path("/ingest/flatfile-to-database")
            .header("authorization", auth.as_str())
            .header("content-type", content_type.as_str())
            .body(multipart(&[
                ("file", Some("stock.csv"), "qty,sku\n4,W-1\n"),
                ("table_name", None, "inventory"),
                ("columns", None, "sku,name"),
            ]))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 400);
        assert!(json(res.body())["message"]
            .as_str()
            .unwrap()
            .contains("Available columns"));

        let res = request()
            .method("POST")
            .path("/ingest/flatfile-to-database")
            .header("authorization", auth.as_str())
            .header("content-type", content_type.as_str())
            .body(multipart(&[("table_name", None, "inventory")]))
            .reply(&api)
            .await;
        assert_eq!(res.status(), 400);
        assert_eq!(json(res.body())["message"], "missing input: no file");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let h = harness();
        let res = request()
            .method("GET")
            .path("/nowhere")
            .reply(&routes(h.state.clone()))
            .await;
        assert_eq!(res.status(), 404);
    }
}
