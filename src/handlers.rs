//! Thin HTTP dispatcher over the edge graph core
//!
//! Handlers only map requests onto core calls and return the core's plain
//! values or typed errors; status-code mapping lives in `errors.rs`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::edge_graph::{
    ConnectionView, Direction, EdgeGraphService, EdgePresence, Message, UpsertOutcome,
};
use crate::errors::EdgeError;
use crate::ingestion::{IngestionClient, SearchHit};
use crate::metrics;
use crate::profiles::{ProfileCatalog, ProfileMetadata};

/// Shared application state
pub struct AppState {
    pub graph: Arc<EdgeGraphService>,
    pub profiles: ProfileCatalog,
    pub ingestion: Arc<IngestionClient>,
}

pub type SharedState = Arc<AppState>;

/// Build the service router
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/members/:owner_id/connections", get(list_connections))
        .route(
            "/v1/members/:owner_id/edges/:target_id",
            put(upsert_edge).get(check_edge),
        )
        .route(
            "/v1/members/:owner_id/edges/:target_id/messages",
            post(add_message).get(get_messages),
        )
        .route("/v1/profiles/:profile_id", put(put_profile))
        .route("/v1/search", get(search))
        .layer(axum::middleware::from_fn(crate::middleware::track_metrics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SeedMessage {
    pub content: String,
    pub direction: Direction,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertEdgeRequest {
    pub status: String,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Option<Vec<SeedMessage>>,
}

async fn upsert_edge(
    State(state): State<SharedState>,
    Path((owner_id, target_id)): Path<(String, String)>,
    Json(req): Json<UpsertEdgeRequest>,
) -> Result<Json<UpsertOutcome>, EdgeError> {
    let seeds = req.messages.map(|list| {
        list.into_iter()
            .map(|m| Message {
                content: m.content,
                timestamp: m.timestamp.unwrap_or_else(Utc::now),
                direction: m.direction,
            })
            .collect()
    });

    let outcome = state
        .graph
        .upsert_status(&owner_id, &target_id, &req.status, req.added_at, seeds)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct AddMessageRequest {
    pub content: String,
    pub direction: Direction,
}

async fn add_message(
    State(state): State<SharedState>,
    Path((owner_id, target_id)): Path<(String, String)>,
    Json(req): Json<AddMessageRequest>,
) -> Result<Json<serde_json::Value>, EdgeError> {
    state
        .graph
        .add_message(&owner_id, &target_id, &req.content, req.direction)?;
    Ok(Json(json!({ "success": true })))
}

async fn get_messages(
    State(state): State<SharedState>,
    Path((owner_id, target_id)): Path<(String, String)>,
) -> Result<Json<Vec<Message>>, EdgeError> {
    Ok(Json(state.graph.get_messages(&owner_id, &target_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ConnectionsQuery {
    pub status: Option<String>,
}

async fn list_connections(
    State(state): State<SharedState>,
    Path(owner_id): Path<String>,
    Query(params): Query<ConnectionsQuery>,
) -> Result<Json<Vec<ConnectionView>>, EdgeError> {
    Ok(Json(
        state
            .graph
            .get_connections(&owner_id, params.status.as_deref())?,
    ))
}

async fn check_edge(
    State(state): State<SharedState>,
    Path((owner_id, target_id)): Path<(String, String)>,
) -> Result<Json<EdgePresence>, EdgeError> {
    Ok(Json(state.graph.check_exists(&owner_id, &target_id)?))
}

async fn put_profile(
    State(state): State<SharedState>,
    Path(profile_id): Path<String>,
    Json(profile): Json<ProfileMetadata>,
) -> Result<StatusCode, EdgeError> {
    crate::validation::validate_member_id(&profile_id)
        .map_err(|e| EdgeError::validation("profile_id", e))?;
    state
        .profiles
        .put(&profile_id, &profile)
        .map_err(|e| EdgeError::ExternalService(format!("profile write failed: {e}")))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    10
}

async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, EdgeError> {
    let hits = state
        .ingestion
        .search(&params.q, params.limit)
        .await
        .map_err(|e| match e.downcast_ref::<crate::circuit_breaker::CircuitOpenError>() {
            Some(open) => EdgeError::CircuitOpen {
                service: open.service.clone(),
                retry_in_secs: open.retry_in.as_secs(),
            },
            None => EdgeError::ExternalService(format!("search failed: {e}")),
        })?;
    Ok(Json(hits))
}

async fn health(State(state): State<SharedState>) -> (StatusCode, Json<serde_json::Value>) {
    let health = state.graph.health_check();
    let code = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": if health.healthy { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "details": health.details,
            "ingestion_breaker": state.graph.ingestion_breaker(),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

/// Prometheus metrics endpoint for observability
async fn metrics_endpoint() -> Result<String, StatusCode> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = metrics::METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
