//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use linkward_server::{build_app_with_state, AppState, Config};

/// Builds the service router for a test configuration.
pub async fn app_with(config: Config) -> Router {
    let state = Arc::new(AppState::from_config(&config).await.unwrap());
    build_app_with_state(state, &config).unwrap()
}

/// A `{"urls": [...]}` body from `(context, url)` pairs.
pub fn check_body(urls: &[(&str, &str)]) -> String {
    let urls: Vec<_> = urls
        .iter()
        .map(|(context, url)| serde_json::json!({ "context": context, "url": url }))
        .collect();
    serde_json::json!({ "urls": urls }).to_string()
}

/// POSTs a JSON body and returns status and body text.
pub async fn post_json(app: &Router, path: &str, body: String) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// GETs a path and returns status, headers and body text.
pub async fn get(app: &Router, path: &str) -> (StatusCode, HeaderMap, String) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses a batch response body.
pub fn parse_batch(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}
