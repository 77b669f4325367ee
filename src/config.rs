use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};
use tracing::warn;
use url::Url;

const DEV_SECRET: &str = "flatbridge-dev-secret";

/// Runtime settings for the service.
///
/// Loaded from defaults, then an optional YAML file named by
/// `FLATBRIDGE_CONFIG`, then individual environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// DuckDB file; `None` keeps the database in memory.
    pub database_path: Option<PathBuf>,
    /// Append-only ledger; must already exist.
    pub reference_csv: PathBuf,
    /// Replaced on every export.
    pub export_csv: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub token_subject: String,
    pub cors_origin: String,
    pub max_upload_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            database_path: None,
            reference_csv: PathBuf::from("product.csv"),
            export_csv: PathBuf::from("output.csv"),
            jwt_secret: DEV_SECRET.to_string(),
            token_ttl_minutes: 30,
            token_subject: "ingest-client".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Build the effective config from the process environment.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var("FLATBRIDGE_CONFIG") {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.validate()?;
        if cfg.jwt_secret == DEV_SECRET {
            warn!("FLATBRIDGE_JWT_SECRET not set; using the development secret");
        }
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("FLATBRIDGE_HOST") {
            self.host = v.parse().with_context(|| format!("FLATBRIDGE_HOST={v}"))?;
        }
        // Cloud-style PORT wins over the namespaced one.
        if let Some(v) = lookup("PORT").or_else(|| lookup("FLATBRIDGE_PORT")) {
            self.port = v.parse().with_context(|| format!("port={v}"))?;
        }
        if let Some(v) = lookup("FLATBRIDGE_DATABASE") {
            self.database_path = if v.is_empty() { None } else { Some(v.into()) };
        }
        if let Some(v) = lookup("FLATBRIDGE_REFERENCE_CSV") {
            self.reference_csv = v.into();
        }
        if let Some(v) = lookup("FLATBRIDGE_EXPORT_CSV") {
            self.export_csv = v.into();
        }
        if let Some(v) = lookup("FLATBRIDGE_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = lookup("FLATBRIDGE_TOKEN_TTL_MINUTES") {
            self.token_ttl_minutes = v
                .parse()
                .with_context(|| format!("FLATBRIDGE_TOKEN_TTL_MINUTES={v}"))?;
        }
        if let Some(v) = lookup("FLATBRIDGE_TOKEN_SUBJECT") {
            self.token_subject = v;
        }
        if let Some(v) = lookup("FLATBRIDGE_CORS_ORIGIN") {
            self.cors_origin = v;
        }
        if let Some(v) = lookup("FLATBRIDGE_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = v
                .parse()
                .with_context(|| format!("FLATBRIDGE_MAX_UPLOAD_BYTES={v}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("jwt_secret must not be empty");
        }
        if self.token_ttl_minutes <= 0 {
            bail!("token_ttl_minutes must be positive, got {}", self.token_ttl_minutes);
        }
        if self.token_subject.is_empty() {
            bail!("token_subject must not be empty");
        }
        self.cors_origin()?;
        Ok(())
    }

    /// The CORS origin normalized to `scheme://host[:port]`.
    pub fn cors_origin(&self) -> Result<String> {
        let url = Url::parse(&self.cors_origin)
            .with_context(|| format!("cors_origin {:?} is not a URL", self.cors_origin))?;
        let origin = url.origin();
        if !origin.is_tuple() || url.path() != "/" || url.query().is_some() {
            bail!(
                "cors_origin {:?} must be a bare scheme://host[:port]",
                self.cors_origin
            );
        }
        Ok(origin.ascii_serialization())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
