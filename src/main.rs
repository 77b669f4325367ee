use anyhow::{Context, Result};
use flatbridge::{
    config::Config,
    server::{self, AppState},
    warehouse::{DuckWarehouse, Warehouse},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) load config ──────────────────────────────────────────────
    let config = Config::load().context("loading configuration")?;
    if !config.reference_csv.is_file() {
        warn!(
            path = %config.reference_csv.display(),
            "reference CSV does not exist; appends will be rejected until it does"
        );
    }

    // ─── 3) open the database adapter ────────────────────────────────
    let warehouse: Arc<dyn Warehouse> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "opening DuckDB file");
            Arc::new(DuckWarehouse::open(path)?)
        }
        None => {
            info!("opening in-memory DuckDB");
            Arc::new(DuckWarehouse::open_in_memory()?)
        }
    };

    // ─── 4) serve until ctrl-c ───────────────────────────────────────
    let addr = config.bind_addr();
    let state = AppState::new(config, warehouse)?;
    let (addr, serving) = warp::serve(server::routes(state))
        .try_bind_with_graceful_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .with_context(|| format!("binding {addr}"))?;

    info!("listening on http://{}", addr);
    info!("token endpoint: POST http://{}/token", addr);
    serving.await;

    info!("all done");
    Ok(())
}
