use anyhow::{Context, Result};
use serde::Deserialize;
use std::{net::SocketAddr, time::Duration};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Base URL of the downstream table service, without trailing slash.
    pub db_endpoint: String,
    pub server_name: String,
    pub scheme: String,
    pub page_size_default: u64,
    pub page_size_max: u64,
    pub batch_size: u64,
    pub allow_aggregation: Vec<Uuid>,
    pub request_timeout: Duration,
    pub sentry_dsn: Option<String>,
    pub sentry_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    db_endpoint: Option<String>,
    #[serde(default)]
    pgrest_endpoint: Option<String>,
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    scheme: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_page_size")]
    page_size_default: u64,
    #[serde(default = "default_page_size_max")]
    page_size_max: u64,
    #[serde(default = "default_batch_size")]
    batch_size: u64,
    #[serde(default)]
    allow_aggregation: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    sentry_dsn: Option<String>,
    #[serde(default)]
    sentry_env: Option<String>,
}

const fn default_port() -> u16 {
    8005
}

const fn default_page_size() -> u64 {
    20
}

const fn default_page_size_max() -> u64 {
    50
}

const fn default_batch_size() -> u64 {
    500
}

const fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig = envy::from_env().context("failed to parse environment variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        // DB_ENDPOINT and PGREST_ENDPOINT are interchangeable deployment names.
        let endpoint = raw
            .db_endpoint
            .or(raw.pgrest_endpoint)
            .context("DB_ENDPOINT or PGREST_ENDPOINT must be set")?;
        let db_endpoint = normalize_endpoint(&endpoint)?;

        let scheme = raw.scheme.unwrap_or_else(|| "http".to_string());
        if scheme != "http" && scheme != "https" {
            anyhow::bail!("SCHEME must be 'http' or 'https', got '{scheme}'");
        }

        let server_name = raw
            .server_name
            .unwrap_or_else(|| format!("localhost:{}", raw.port));

        let allow_aggregation = parse_uuid_list(raw.allow_aggregation.as_deref())?;

        let listen_addr = SocketAddr::from(([0, 0, 0, 0], raw.port));

        Ok(Self {
            listen_addr,
            db_endpoint,
            server_name,
            scheme,
            page_size_default: raw.page_size_default.max(1),
            page_size_max: raw.page_size_max.max(raw.page_size_default).max(1),
            batch_size: raw.batch_size.max(1),
            allow_aggregation,
            request_timeout: Duration::from_secs(raw.timeout_secs.max(1)),
            sentry_dsn: raw.sentry_dsn,
            sentry_env: raw.sentry_env,
        })
    }

    pub fn external_url(&self, path_and_query: &str) -> String {
        format!("{}://{}{}", self.scheme, self.server_name, path_and_query)
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        anyhow::bail!("downstream endpoint must not be empty");
    }
    let with_scheme = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };
    Url::parse(&with_scheme).with_context(|| format!("invalid downstream endpoint '{endpoint}'"))?;
    Ok(with_scheme.trim_end_matches('/').to_string())
}

fn parse_uuid_list(raw: Option<&str>) -> Result<Vec<Uuid>> {
    let Some(csv) = raw else {
        return Ok(Vec::new());
    };
    csv.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<Uuid>()
                .with_context(|| format!("ALLOW_AGGREGATION entry '{part}' is not a UUID"))
        })
        .collect()
}
