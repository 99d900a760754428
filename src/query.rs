//! Executes compiled plans against the downstream service and drives the
//! pagination protocol: window totals, the aggregated group-count probe, and
//! absolute next/prev links.

use crate::{
    compiler,
    config::AppConfig,
    downstream::{Downstream, RowSet},
    error::Result,
    parser::QueryPlan,
};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryEngine {
    downstream: Arc<Downstream>,
}

#[derive(Debug)]
pub struct DataPage {
    pub rows: Vec<Value>,
    pub total: Option<u64>,
}

impl QueryEngine {
    pub fn new(downstream: Arc<Downstream>) -> Self {
        Self { downstream }
    }

    pub async fn execute(&self, table: &str, plan: &QueryPlan) -> Result<DataPage> {
        let compiled = compiler::compile(plan);
        let RowSet { rows, total } = self.downstream.fetch_rows(table, &compiled).await?;
        let total = self.resolve_total(table, plan, total).await?;
        Ok(DataPage { rows, total })
    }

    /// The window's `Content-Range` total counts pre-aggregation rows, so
    /// aggregated plans get their total from the group-count probe instead.
    /// An aggregate without grouping collapses to a single row.
    async fn resolve_total(
        &self,
        table: &str,
        plan: &QueryPlan,
        window_total: Option<u64>,
    ) -> Result<Option<u64>> {
        if plan.aggregation.is_none() {
            return Ok(window_total);
        }
        match compiler::compile_group_probe(plan) {
            Some(probe) => Ok(self.downstream.fetch_rows(table, &probe).await?.total),
            None => Ok(Some(1)),
        }
    }

    /// One batch of an export walk; no totals, no probe.
    pub async fn fetch_window(
        &self,
        table: &str,
        plan: &QueryPlan,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Value>> {
        let compiled = compiler::compile_window(plan, offset, limit);
        Ok(self.downstream.fetch_rows(table, &compiled).await?.rows)
    }
}

#[derive(Debug, Default)]
pub struct PageLinks {
    pub next: Option<String>,
    pub prev: Option<String>,
}

/// `next` exists while rows remain past the current window; with an unknown
/// total a full page is read as "probably more". `prev` exists off page one.
pub fn page_links(
    config: &AppConfig,
    path: &str,
    raw_query: &str,
    plan: &QueryPlan,
    rows_returned: usize,
    total: Option<u64>,
) -> PageLinks {
    let has_next = match total {
        Some(total) => plan.page * plan.page_size < total,
        None => rows_returned as u64 == plan.page_size,
    };
    let next = has_next
        .then(|| link_with_page(config, path, raw_query, plan.page + 1, plan.page_size));
    let prev = (plan.page > 1)
        .then(|| link_with_page(config, path, raw_query, plan.page - 1, plan.page_size));
    PageLinks { next, prev }
}

/// Rebuilds the request query with the pagination pair re-pinned. Other
/// segments are kept byte-for-byte so links round-trip the client's encoding.
fn link_with_page(
    config: &AppConfig,
    path: &str,
    raw_query: &str,
    page: u64,
    page_size: u64,
) -> String {
    let mut segments: Vec<&str> = raw_query
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_pagination_segment(segment))
        .collect();
    let pagination = format!("page={page}&page_size={page_size}");
    segments.push(&pagination);
    config.external_url(&format!("{path}?{}", segments.join("&")))
}

fn is_pagination_segment(segment: &str) -> bool {
    let key = segment.split('=').next().unwrap_or(segment);
    key == "page" || key == "page_size"
}
