use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use barrel::{build_app, BarrelConfig, BarrelNode};
use http_body_util::BodyExt;
use index_core::discovery::StaticDiscovery;
use index_core::persist::decode_snapshot;
use index_core::{PageRecord, SearchResultItem, StoreStats};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tower::ServiceExt;

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn new_node(dir: &std::path::Path) -> Arc<BarrelNode> {
    Arc::new(BarrelNode::new(
        BarrelConfig {
            id: "b1".into(),
            data_dir: dir.to_path_buf(),
            persist_interval: Duration::from_secs(60),
        },
        None,
    ))
}

fn page(url: &str, terms: &[&str], links: &[&str]) -> Value {
    serde_json::to_value(PageRecord {
        url: url.into(),
        title: format!("Title of {url}"),
        snippet: "snippet".into(),
        terms: terms.iter().map(|t| t.to_string()).collect(),
        out_links: links.iter().map(|l| l.to_string()).collect(),
    })
    .unwrap()
}

#[tokio::test]
async fn documents_search_and_backlinks() {
    let dir = tempdir().unwrap();
    let app = build_app(new_node(dir.path()));

    let (status, _) = call(&app, post_json("/documents", page("a.com", &["cat", "dog"], &["b.com"]))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    call(&app, post_json("/documents", page("c.com", &["cat"], &["b.com"]))).await;

    let (status, body) = call(&app, post_json("/search", json!({"terms": ["Cat"], "page": 0, "page_size": 10}))).await;
    assert_eq!(status, StatusCode::OK);
    let hits: Vec<SearchResultItem> = serde_json::from_slice(&body).unwrap();
    let urls: Vec<_> = hits.iter().map(|h| h.url.as_str()).collect();
    assert_eq!(urls, vec!["a.com", "c.com"]);
    assert_eq!(hits[0].title, "Title of a.com");

    let (_, body) = call(&app, post_json("/search", json!({"terms": ["cat", "dog"], "page_size": 10}))).await;
    let hits: Vec<SearchResultItem> = serde_json::from_slice(&body).unwrap();
    assert_eq!(hits.len(), 1);

    let (status, body) = call(&app, get("/backlinks?url=b.com")).await;
    assert_eq!(status, StatusCode::OK);
    let sources: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(sources, vec!["a.com", "c.com"]);

    let (_, body) = call(&app, get("/stats")).await;
    let stats: StoreStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats.page_count, 2);
    assert_eq!(stats.term_count, 2);
    assert_eq!(stats.backlink_entry_count, 1);
}

#[tokio::test]
async fn ping_and_health() {
    let dir = tempdir().unwrap();
    let app = build_app(new_node(dir.path()));

    let (status, body) = call(&app, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "PONG");

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn state_is_unavailable_until_ready() {
    let dir = tempdir().unwrap();
    let node = new_node(dir.path());
    let app = build_app(node.clone());
    call(&app, post_json("/documents", page("a.com", &["rust"], &[]))).await;

    let (status, _) = call(&app, get("/state")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    node.bootstrap(&StaticDiscovery::default()).await;
    let resp = app.clone().oneshot(get("/state")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/octet-stream");
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let snapshot = decode_snapshot(&body).unwrap();
    assert!(snapshot.pages.contains_key("a.com"));
    assert!(snapshot.index["rust"].contains("a.com"));
}

#[tokio::test]
async fn oversized_pages_are_capped() {
    let dir = tempdir().unwrap();
    let app = build_app(new_node(dir.path()));
    for i in 0..120 {
        call(&app, post_json("/documents", page(&format!("p{i:03}.com"), &["rust"], &[]))).await;
    }
    let (_, body) = call(&app, post_json("/search", json!({"terms": ["rust"], "page": 0, "page_size": 1000}))).await;
    let hits: Vec<SearchResultItem> = serde_json::from_slice(&body).unwrap();
    assert_eq!(hits.len(), 100);
}
