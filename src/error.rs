use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// `page` and `page_size` are reported as bare keys, real columns with their
/// operator suffix.
fn clause_label(column: &str, operator: &str) -> String {
    if operator.is_empty() {
        column.to_string()
    } else {
        format!("{column}__{operator}")
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("resource {resource_id} not found")]
    ResourceNotFound { resource_id: Uuid },

    #[error("resource {resource_id} has been permanently deleted by its producer")]
    ResourceGone {
        resource_id: Uuid,
        dataset_id: Option<Uuid>,
    },

    #[error("no profile stored for resource {resource_id}")]
    ProfileNotFound { resource_id: Uuid },

    #[error("operator '{operator}' is not allowed on column '{column}'")]
    InvalidParameter { column: String, operator: String },

    #[error("invalid value '{value}' for '{}'", clause_label(.column, .operator))]
    InvalidValue {
        column: String,
        operator: String,
        value: String,
    },

    #[error("aggregation is not allowed for resource {resource_id}")]
    AggregationNotAllowed { resource_id: Uuid },

    #[error("downstream table service unavailable")]
    DownstreamUnavailable,

    #[error("downstream table service timed out")]
    DownstreamTimeout,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    fn code(&self) -> &'static str {
        match self {
            ServiceError::ResourceNotFound { .. } => "resource_not_found",
            ServiceError::ResourceGone { .. } => "resource_gone",
            ServiceError::ProfileNotFound { .. } => "profile_not_found",
            ServiceError::InvalidParameter { .. } => "invalid_parameter",
            ServiceError::InvalidValue { .. } => "invalid_value",
            ServiceError::AggregationNotAllowed { .. } => "aggregation_not_allowed",
            ServiceError::DownstreamUnavailable => "downstream_unavailable",
            ServiceError::DownstreamTimeout => "downstream_unavailable",
            ServiceError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::ResourceNotFound { .. } | ServiceError::ProfileNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::ResourceGone { .. } => StatusCode::GONE,
            ServiceError::InvalidParameter { .. } | ServiceError::InvalidValue { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::AggregationNotAllowed { .. } => StatusCode::FORBIDDEN,
            ServiceError::DownstreamUnavailable => StatusCode::BAD_GATEWAY,
            ServiceError::DownstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> serde_json::Value {
        let mut entry = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        let extras = entry.as_object_mut().expect("entry is an object");
        match self {
            ServiceError::ResourceNotFound { resource_id }
            | ServiceError::ProfileNotFound { resource_id }
            | ServiceError::AggregationNotAllowed { resource_id } => {
                extras.insert("resource_id".into(), json!(resource_id));
            }
            ServiceError::ResourceGone {
                resource_id,
                dataset_id,
            } => {
                extras.insert("resource_id".into(), json!(resource_id));
                if let Some(dataset_id) = dataset_id {
                    extras.insert("dataset_id".into(), json!(dataset_id));
                }
            }
            ServiceError::InvalidParameter { column, operator } => {
                extras.insert("column".into(), json!(column));
                extras.insert("operator".into(), json!(operator));
            }
            ServiceError::InvalidValue {
                column,
                operator,
                value,
            } => {
                extras.insert("column".into(), json!(column));
                extras.insert("operator".into(), json!(operator));
                extras.insert("value".into(), json!(value));
            }
            _ => {}
        }
        json!({ "errors": [entry] })
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if matches!(
            self,
            ServiceError::Internal(_)
                | ServiceError::DownstreamUnavailable
                | ServiceError::DownstreamTimeout
        ) {
            error!(error = %self, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
