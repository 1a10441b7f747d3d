pub mod cache;
pub mod coordinator;
pub mod stats;
pub mod subscribers;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use coordinator::Coordinator;
use index_core::discovery::ReplicaEndpoint;
use index_core::rpc::{ReplicaNotice, ENDPOINT_NOTIFY};
use index_core::{ReplicaHandle, SearchResultItem};
use serde::{Deserialize, Serialize};
use stats::StatsReport;
use std::sync::Arc;
use std::time::Duration;
use subscribers::HttpSubscriber;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub page: usize,
}

#[derive(Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub page: usize,
    pub took_s: f64,
    pub results: Vec<SearchResultItem>,
}

#[derive(Deserialize)]
pub struct BacklinksParams {
    pub url: String,
}

#[derive(Deserialize)]
pub struct IndexRequest {
    pub url: String,
}

#[derive(Serialize, Deserialize)]
pub struct IndexResponse {
    pub url: String,
    pub accepted: bool,
}

#[derive(Serialize, Deserialize)]
pub struct PingResponse {
    pub active_replicas: usize,
    /// Frontier's reply, absent when it is unreachable.
    pub frontier: Option<String>,
}

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub callback: String,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub client: reqwest::Client,
    pub call_timeout: Duration,
    pub admin_token: Option<String>,
}

impl AppState {
    /// Reads `ADMIN_TOKEN` from the environment.
    pub fn from_env(coordinator: Arc<Coordinator>, client: reqwest::Client, call_timeout: Duration) -> Self {
        let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        Self { coordinator, client, call_timeout, admin_token }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ping", get(ping_handler))
        .route("/search", get(search_handler))
        .route("/backlinks", get(backlinks_handler))
        .route("/index", post(index_handler))
        .route("/stats", get(stats_handler))
        .route("/subscribers", post(subscribe_handler))
        .route(ENDPOINT_NOTIFY, post(notify_handler))
        .route("/replicas", post(register_replica_handler))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

// CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let terms: Vec<String> = params.q.split_whitespace().map(str::to_string).collect();
    match state.coordinator.search(&terms, params.page).await {
        Ok(results) => Ok(Json(SearchResponse {
            query: params.q,
            page: params.page,
            took_s: start.elapsed().as_secs_f64(),
            results,
        })),
        Err(e) => {
            tracing::error!(query = %params.q, error = %e, "search failed");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

pub async fn backlinks_handler(
    State(state): State<AppState>,
    Query(params): Query<BacklinksParams>,
) -> Json<Vec<String>> {
    Json(state.coordinator.get_backlinks(&params.url).await)
}

async fn index_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let accepted = state.coordinator.index_url(&req.url).await;
    Ok(Json(IndexResponse { url: req.url, accepted }))
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsReport> {
    Json(state.coordinator.get_stats().await)
}

async fn ping_handler(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        active_replicas: state.coordinator.active_ids().len(),
        frontier: state.coordinator.ping_frontier().await,
    })
}

async fn subscribe_handler(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if url::Url::parse(&req.callback).is_err() {
        return Err((StatusCode::BAD_REQUEST, "callback must be an absolute url".into()));
    }
    let subscriber = HttpSubscriber::new(req.callback, state.client.clone(), state.call_timeout);
    state.coordinator.register_subscriber(Arc::new(subscriber));
    Ok(StatusCode::CREATED)
}

async fn notify_handler(State(state): State<AppState>, Json(notice): Json<ReplicaNotice>) -> StatusCode {
    state.coordinator.notify_from_replica(&notice.replica_id, notice.stats).await;
    StatusCode::NO_CONTENT
}

async fn register_replica_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(endpoint): Json<ReplicaEndpoint>,
) -> Result<StatusCode, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let handle = ReplicaHandle::http(endpoint.id, &endpoint.addr, state.client.clone(), state.call_timeout);
    state.coordinator.register_replica(handle);
    Ok(StatusCode::CREATED)
}

/// Admin routes are open unless `ADMIN_TOKEN` is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let Some(required) = &state.admin_token else {
        return Ok(());
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required.as_str() {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
