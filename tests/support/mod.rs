//! Shared harness: a wiremock downstream, a configured router, and request
//! helpers driving it through `tower::ServiceExt`.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tabq::{config::AppConfig, server::Server};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const RESOURCE_ID: &str = "aaaaaaaa-1111-bbbb-2222-cccccccccccc";
pub const TABLE: &str = "table_aaaaaaaa";

pub struct Harness {
    pub downstream: MockServer,
    pub router: Router,
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(tweak: impl FnOnce(&mut AppConfig)) -> Harness {
    let downstream = MockServer::start().await;
    let mut config = AppConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        db_endpoint: downstream.uri(),
        server_name: "api.test".to_string(),
        scheme: "http".to_string(),
        page_size_default: 20,
        page_size_max: 50,
        batch_size: 500,
        allow_aggregation: Vec::new(),
        request_timeout: Duration::from_secs(5),
        sentry_dsn: None,
        sentry_env: None,
    };
    tweak(&mut config);
    let router = Server::new(config).expect("failed to build gateway").router();
    Harness { downstream, router }
}

pub fn resource_id() -> Uuid {
    RESOURCE_ID.parse().unwrap()
}

pub fn profile_document() -> Value {
    json!({
        "columns": {
            "id": {"type": "string"},
            "score": {"type": "float"},
            "decompte": {"type": "int"},
            "is_true": {"type": "bool"},
            "birth": {"type": "date"},
            "liste": {"type": "string"},
        }
    })
}

impl Harness {
    /// Registers the directory fixtures for a live resource.
    pub async fn seed_resource(&self, rid: Uuid, aggregation_exception: bool) {
        self.seed_resource_record(rid, "ok", None).await;
        self.seed_table_index(rid, TABLE, profile_document()).await;
        self.seed_exception(rid, aggregation_exception).await;
    }

    pub async fn seed_resource_record(&self, rid: Uuid, status: &str, dataset_id: Option<Uuid>) {
        let mut record = json!({
            "resource_id": rid,
            "status": status,
            "created_at": "2025-06-12T08:30:00+00:00",
            "url": "https://files.example.org/source.csv",
        });
        if let Some(dataset_id) = dataset_id {
            record["dataset_id"] = json!(dataset_id);
        }
        Mock::given(method("GET"))
            .and(path("/resources"))
            .and(query_param("resource_id", format!("eq.{rid}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([record])))
            .mount(&self.downstream)
            .await;
    }

    pub async fn seed_table_index(&self, rid: Uuid, table: &str, profile: Value) {
        Mock::given(method("GET"))
            .and(path("/tables_index"))
            .and(query_param("resource_id", format!("eq.{rid}")))
            .and(query_param("select", "parsing_table"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "parsing_table": table }])),
            )
            .mount(&self.downstream)
            .await;
        Mock::given(method("GET"))
            .and(path("/tables_index"))
            .and(query_param("resource_id", format!("eq.{rid}")))
            .and(query_param("select", "profile"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "profile": profile }])),
            )
            .mount(&self.downstream)
            .await;
    }

    pub async fn seed_exception(&self, rid: Uuid, present: bool) {
        let rows = if present {
            json!([{ "resource_id": rid }])
        } else {
            json!([])
        };
        Mock::given(method("GET"))
            .and(path("/exceptions"))
            .and(query_param("resource_id", format!("eq.{rid}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.downstream)
            .await;
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, bytes) = self.get_raw(uri).await;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body should be JSON")
        };
        (status, body)
    }

    pub async fn get_raw(&self, uri: &str) -> (StatusCode, HeaderMap, bytes::Bytes) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request is well formed"),
            )
            .await
            .expect("router never fails");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        (status, headers, bytes)
    }
}

/// Rows plus the `Content-Range` total the downstream would attach.
pub fn rows_response(rows: Value, content_range: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(rows)
        .insert_header("Content-Range", content_range)
}
