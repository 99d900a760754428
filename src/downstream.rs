//! Shared outbound client for the downstream table service.
//!
//! Every row read goes through [`Downstream::fetch_rows`], which speaks the
//! service's row-window protocol: `Range`/`Range-Unit: rows` on the request,
//! exact totals in the `Content-Range` response header.

use crate::{
    compiler::CompiledQuery,
    error::{Result, ServiceError},
};
use anyhow::Context;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct Downstream {
    client: Client,
    base: String,
}

#[derive(Debug)]
pub struct RowSet {
    pub rows: Vec<Value>,
    pub total: Option<u64>,
}

impl Downstream {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build downstream HTTP client")?;
        Ok(Self {
            client,
            base: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_rows(&self, table: &str, compiled: &CompiledQuery) -> Result<RowSet> {
        let response = self
            .client
            .get(format!("{}/{}", self.base, table))
            .query(&compiled.params)
            .header("Range-Unit", "rows")
            .header(header::RANGE, compiled.range())
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, table));
        }

        let total = content_range_total(
            response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|value| value.to_str().ok()),
        );
        debug!(table, range = %compiled.range(), ?total, "fetched rows");

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|err| ServiceError::Internal(anyhow::anyhow!(err).context("downstream body was not a JSON row array")))?;

        Ok(RowSet { rows, total })
    }

    /// Point lookup against a directory table; at most one row.
    pub async fn lookup_one(&self, table: &str, params: &[(String, String)]) -> Result<Option<Value>> {
        let mut params = params.to_vec();
        params.push(("limit".to_string(), "1".to_string()));
        let rows = self.lookup_all(table, &params).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn lookup_all(&self, table: &str, params: &[(String, String)]) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(format!("{}/{}", self.base, table))
            .query(params)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, table));
        }

        response.json().await.map_err(|err| {
            ServiceError::Internal(
                anyhow::anyhow!(err).context(format!("directory table '{table}' returned malformed JSON")),
            )
        })
    }

    /// Liveness of the downstream service itself.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .head(&self.base)
            .send()
            .await
            .map_err(map_transport)?;
        if response.status().is_server_error() {
            return Err(ServiceError::DownstreamUnavailable);
        }
        Ok(())
    }
}

fn map_transport(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::DownstreamTimeout
    } else {
        ServiceError::DownstreamUnavailable
    }
}

fn map_status(status: StatusCode, table: &str) -> ServiceError {
    if status.is_client_error() {
        // the gateway owns request validity; a downstream 4xx is our bug
        ServiceError::Internal(anyhow::anyhow!(
            "downstream rejected a gateway-built request for '{table}' with {status}"
        ))
    } else {
        ServiceError::DownstreamUnavailable
    }
}

/// Trailing integer of `Content-Range: <first>-<last>/<total>`. Unknown (`*`),
/// absent or malformed totals degrade to `None`.
pub fn content_range_total(header: Option<&str>) -> Option<u64> {
    let raw = header?;
    let (_, total) = raw.rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}
