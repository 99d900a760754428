//! Per-resource column profiles: the inferred header and semantic types that
//! drive operator validation and document generation.

use crate::{
    downstream::Downstream,
    error::{Result, ServiceError},
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Int,
    Float,
    Bool,
    Date,
    Datetime,
    Json,
}

impl SemanticType {
    pub fn from_label(label: &str) -> Self {
        match label {
            "int" => SemanticType::Int,
            "float" => SemanticType::Float,
            "bool" => SemanticType::Bool,
            "date" => SemanticType::Date,
            "datetime" => SemanticType::Datetime,
            "json" => SemanticType::Json,
            // unknown inference labels degrade to plain text
            _ => SemanticType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Int => "int",
            SemanticType::Float => "float",
            SemanticType::Bool => "bool",
            SemanticType::Date => "date",
            SemanticType::Datetime => "datetime",
            SemanticType::Json => "json",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Int | SemanticType::Float)
    }

    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            SemanticType::Int | SemanticType::Float | SemanticType::Date | SemanticType::Datetime
        )
    }

    /// OpenAPI schema type for values of this column.
    pub fn openapi_type(&self) -> &'static str {
        match self {
            SemanticType::Bool => "boolean",
            SemanticType::Int => "integer",
            SemanticType::Float => "number",
            _ => "string",
        }
    }
}

/// Inference profile of one resource. Column order follows the stored
/// document, which follows the source file header.
#[derive(Debug, Clone)]
pub struct Profile {
    columns: Vec<(String, SemanticType)>,
    document: Value,
}

impl Profile {
    /// Reads the stored profile document. The typed part lives under
    /// `columns`; everything else is provenance passed through as is.
    pub fn from_document(document: Value) -> Option<Self> {
        let columns = document
            .get("columns")?
            .as_object()?
            .iter()
            .map(|(name, info)| {
                let label = info.get("type").and_then(Value::as_str).unwrap_or("string");
                (name.clone(), SemanticType::from_label(label))
            })
            .collect::<Vec<_>>();
        if columns.is_empty() {
            return None;
        }
        Some(Self { columns, document })
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, SemanticType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn semantic_type(&self, column: &str) -> Option<SemanticType> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| *ty)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}

/// Fetches the stored inference profile for a resource. A resource without a
/// usable profile is a distinct failure from a missing resource.
pub async fn fetch(downstream: &Downstream, resource_id: Uuid) -> Result<Profile> {
    let row = downstream
        .lookup_one(
            "tables_index",
            &[
                ("select".to_string(), "profile".to_string()),
                ("resource_id".to_string(), format!("eq.{resource_id}")),
            ],
        )
        .await?;

    row.and_then(|mut row| row.get_mut("profile").map(Value::take))
        .and_then(Profile::from_document)
        .ok_or(ServiceError::ProfileNotFound { resource_id })
}
