use crate::{
    config::AppConfig,
    directory::Directory,
    downstream::Downstream,
    encode,
    error::{Result, ServiceError},
    parser::{self, QueryPlan, SYNTHETIC_ID},
    profile::{self, Profile},
    query::{self, QueryEngine},
    state::AppState,
    swagger,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use url::form_urlencoded;
use uuid::Uuid;

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let downstream = Arc::new(Downstream::new(&config.db_endpoint, config.request_timeout)?);
        let config = Arc::new(config);
        let directory = Directory::new(Arc::clone(&downstream), Arc::clone(&config));
        let engine = QueryEngine::new(downstream);
        let state = AppState::new(Arc::clone(&config), directory, engine);
        Ok(Self { config, state })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(Self::health))
            .route("/api/resources/:rid/", get(Self::resource_meta))
            .route("/api/resources/:rid/profile/", get(Self::resource_profile))
            .route("/api/resources/:rid/swagger/", get(Self::resource_swagger))
            .route("/api/resources/:rid/data/", get(Self::resource_data))
            .route("/api/resources/:rid/data/csv/", get(Self::resource_data_csv))
            .route("/api/resources/:rid/data/json/", get(Self::resource_data_json))
            .route("/api/aggregation-exceptions/", get(Self::aggregation_exceptions))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "gateway listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
        state.directory.downstream().ping().await?;
        Ok(Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.started.elapsed().as_secs_f64(),
        })))
    }

    async fn resource_meta(
        State(state): State<AppState>,
        Path(rid): Path<Uuid>,
    ) -> Result<Json<Value>> {
        let resource = state.directory.resolve(rid).await?;
        let link = |rel: &str, segment: &str| {
            json!({
                "href": state.config.external_url(&format!("/api/resources/{rid}/{segment}/")),
                "type": "GET",
                "rel": rel,
            })
        };
        Ok(Json(json!({
            "resource_id": rid,
            "created_at": resource.created_at,
            "url": resource.url,
            "links": [
                link("profile", "profile"),
                link("data", "data"),
                link("swagger", "swagger"),
            ],
        })))
    }

    async fn resource_profile(
        State(state): State<AppState>,
        Path(rid): Path<Uuid>,
    ) -> Result<Json<Value>> {
        state.directory.resolve(rid).await?;
        let profile = profile::fetch(state.directory.downstream(), rid).await?;
        Ok(Json(json!({
            "resource_id": rid,
            "profile": profile.document(),
        })))
    }

    async fn resource_swagger(
        State(state): State<AppState>,
        Path(rid): Path<Uuid>,
    ) -> Result<Json<Value>> {
        let resource = state.directory.resolve(rid).await?;
        let profile = profile::fetch(state.directory.downstream(), rid).await?;
        Ok(Json(swagger::build_document(
            &profile,
            rid,
            resource.aggregation_allowed,
            state.config.page_size_default,
        )))
    }

    async fn resource_data(
        State(state): State<AppState>,
        Path(rid): Path<Uuid>,
        uri: Uri,
    ) -> Result<Json<Value>> {
        let (resource, profile) = resolve_with_profile(&state, rid).await?;
        let raw_query = uri.query().unwrap_or("");
        let plan = parse_plan(&state, &profile, raw_query)?;
        gate_aggregation(&plan, rid, resource.aggregation_allowed)?;
        let page = state.engine.execute(&resource.table_name, &plan).await?;

        let links = query::page_links(
            &state.config,
            uri.path(),
            raw_query,
            &plan,
            page.rows.len(),
            page.total,
        );
        Ok(Json(json!({
            "data": page.rows,
            "links": {
                "profile": state.config.external_url(&format!("/api/resources/{rid}/profile/")),
                "swagger": state.config.external_url(&format!("/api/resources/{rid}/swagger/")),
                "next": links.next,
                "prev": links.prev,
            },
            "meta": {
                "page": plan.page,
                "page_size": plan.page_size,
                "total": page.total,
            },
        })))
    }

    async fn resource_data_csv(
        State(state): State<AppState>,
        Path(rid): Path<Uuid>,
        uri: Uri,
    ) -> Result<Response> {
        let (resource, profile) = resolve_with_profile(&state, rid).await?;
        let plan = parse_plan(&state, &profile, uri.query().unwrap_or(""))?;
        gate_aggregation(&plan, rid, resource.aggregation_allowed)?;

        let mut fallback = vec![SYNTHETIC_ID.to_string()];
        fallback.extend(profile.column_names());
        let body = encode::csv_stream(
            state.engine.clone(),
            resource.table_name,
            plan,
            state.config.batch_size,
            fallback,
        );
        Ok(attachment_response("text/csv", &format!("{rid}.csv"), body))
    }

    async fn resource_data_json(
        State(state): State<AppState>,
        Path(rid): Path<Uuid>,
        uri: Uri,
    ) -> Result<Response> {
        let (resource, profile) = resolve_with_profile(&state, rid).await?;
        let plan = parse_plan(&state, &profile, uri.query().unwrap_or(""))?;
        gate_aggregation(&plan, rid, resource.aggregation_allowed)?;

        let body = encode::json_array_stream(
            state.engine.clone(),
            resource.table_name,
            plan,
            state.config.batch_size,
        );
        Ok(attachment_response(
            "application/json",
            &format!("{rid}.json"),
            body,
        ))
    }

    async fn aggregation_exceptions(State(state): State<AppState>) -> Result<Json<Value>> {
        let rows = state.directory.aggregation_exceptions().await?;
        Ok(Json(Value::Array(rows)))
    }
}

async fn resolve_with_profile(
    state: &AppState,
    rid: Uuid,
) -> Result<(crate::directory::ResourceRef, Profile)> {
    // the status gate short-circuits before any profile work
    let resource = state.directory.resolve(rid).await?;
    let profile = profile::fetch(state.directory.downstream(), rid).await?;
    Ok((resource, profile))
}

fn parse_plan(state: &AppState, profile: &Profile, raw_query: &str) -> Result<QueryPlan> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();
    parser::parse(
        &pairs,
        profile,
        state.config.page_size_default,
        state.config.page_size_max,
    )
}

fn gate_aggregation(plan: &QueryPlan, resource_id: Uuid, allowed: bool) -> Result<()> {
    if plan.aggregation.is_some() && !allowed {
        return Err(ServiceError::AggregationNotAllowed { resource_id });
    }
    Ok(())
}

fn attachment_response(content_type: &'static str, filename: &str, body: Body) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (headers, body).into_response()
}
