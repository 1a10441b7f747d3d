pub mod node;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use index_core::persist::encode_snapshot;
use index_core::rpc::{
    BacklinksQuery, PingResponse, SearchRequest, ENDPOINT_BACKLINKS, ENDPOINT_DOCUMENTS,
    ENDPOINT_PING, ENDPOINT_SEARCH, ENDPOINT_STATE, ENDPOINT_STATS, PONG,
};
use index_core::{PageRecord, SearchResultItem, StoreStats};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use node::{BarrelConfig, BarrelNode, BarrelState, GatewayNotifier};

const MAX_PAGE_SIZE: usize = 100;

pub fn build_app(node: Arc<BarrelNode>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(ENDPOINT_DOCUMENTS, post(add_document))
        .route(ENDPOINT_SEARCH, post(search))
        .route(ENDPOINT_BACKLINKS, get(backlinks))
        .route(ENDPOINT_STATE, get(full_state))
        .route(ENDPOINT_PING, get(ping))
        .route(ENDPOINT_STATS, get(stats))
        .with_state(node)
        .layer(TraceLayer::new_for_http())
}

async fn add_document(State(node): State<Arc<BarrelNode>>, Json(page): Json<PageRecord>) -> StatusCode {
    tracing::debug!(url = %page.url, terms = page.terms.len(), "document received");
    node.store().add_document(page);
    StatusCode::NO_CONTENT
}

async fn search(State(node): State<Arc<BarrelNode>>, Json(req): Json<SearchRequest>) -> Json<Vec<SearchResultItem>> {
    let page_size = req.page_size.min(MAX_PAGE_SIZE);
    Json(node.store().search_all_terms(&req.terms, req.page, page_size))
}

async fn backlinks(State(node): State<Arc<BarrelNode>>, Query(q): Query<BacklinksQuery>) -> Json<Vec<String>> {
    Json(node.store().get_backlinks(&q.url))
}

// Peers must not bootstrap from a barrel that is still bootstrapping itself.
async fn full_state(State(node): State<Arc<BarrelNode>>) -> Response {
    if !node.is_ready() {
        return (StatusCode::SERVICE_UNAVAILABLE, format!("barrel is {:?}", node.state())).into_response();
    }
    match encode_snapshot(&node.store().full_state()) {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Bytes::from(bytes),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode state");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: PONG.to_string() })
}

async fn stats(State(node): State<Arc<BarrelNode>>) -> Json<StoreStats> {
    Json(node.store().stats())
}
