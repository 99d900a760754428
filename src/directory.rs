//! Resource directory: maps opaque resource ids onto concrete downstream
//! tables and carries per-resource state.

use crate::{
    config::AppConfig,
    downstream::Downstream,
    error::{Result, ServiceError},
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct Directory {
    downstream: Arc<Downstream>,
    config: Arc<AppConfig>,
}

#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub resource_id: Uuid,
    pub table_name: String,
    pub dataset_id: Option<Uuid>,
    pub created_at: Option<Value>,
    pub url: Option<Value>,
    pub aggregation_allowed: bool,
}

impl Directory {
    pub fn new(downstream: Arc<Downstream>, config: Arc<AppConfig>) -> Self {
        Self { downstream, config }
    }

    /// Resolves a resource id to its backing table. A deleted resource masks
    /// every other directory state, including a live `tables_index` row.
    pub async fn resolve(&self, resource_id: Uuid) -> Result<ResourceRef> {
        let mut params = directory_params(
            resource_id,
            "resource_id,status,dataset_id,created_at,url",
        );
        params.push(("order".to_string(), "created_at.desc".to_string()));
        let record = self
            .downstream
            .lookup_one("resources", &params)
            .await?
            .ok_or(ServiceError::ResourceNotFound { resource_id })?;

        let dataset_id = record
            .get("dataset_id")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Uuid>().ok());

        if record.get("status").and_then(Value::as_str) == Some("deleted") {
            return Err(ServiceError::ResourceGone {
                resource_id,
                dataset_id,
            });
        }

        let table_row = self
            .downstream
            .lookup_one("tables_index", &directory_params(resource_id, "parsing_table"))
            .await?
            .ok_or(ServiceError::ResourceNotFound { resource_id })?;
        let table_name = table_row
            .get("parsing_table")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!(
                    "tables_index row for {resource_id} has no parsing_table"
                ))
            })?
            .to_string();

        let aggregation_allowed = self.aggregation_allowed(resource_id).await?;

        Ok(ResourceRef {
            resource_id,
            table_name,
            dataset_id,
            created_at: record.get("created_at").cloned(),
            url: record.get("url").cloned(),
            aggregation_allowed,
        })
    }

    /// Config overlay first, then the `exceptions` whitelist table.
    async fn aggregation_allowed(&self, resource_id: Uuid) -> Result<bool> {
        if self.config.allow_aggregation.contains(&resource_id) {
            return Ok(true);
        }
        let row = self
            .downstream
            .lookup_one("exceptions", &directory_params(resource_id, "resource_id"))
            .await?;
        Ok(row.is_some())
    }

    /// Every resource currently granted aggregation, whitelist rows verbatim
    /// plus entries synthesized from the config overlay.
    pub async fn aggregation_exceptions(&self) -> Result<Vec<Value>> {
        let mut rows = self.downstream.lookup_all("exceptions", &[]).await?;

        for resource_id in &self.config.allow_aggregation {
            let listed = rows.iter().any(|row| {
                row.get("resource_id").and_then(Value::as_str)
                    == Some(resource_id.to_string().as_str())
            });
            if !listed {
                rows.push(json!({ "resource_id": resource_id }));
            }
        }
        Ok(rows)
    }

    pub fn downstream(&self) -> &Arc<Downstream> {
        &self.downstream
    }
}

fn directory_params(resource_id: Uuid, select: &str) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), select.to_string()),
        ("resource_id".to_string(), format!("eq.{resource_id}")),
    ]
}
