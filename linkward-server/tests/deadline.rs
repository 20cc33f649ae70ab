//! The per-request deadline turns slow batches into partial results.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{app_with, check_body, parse_batch, post_json};
use linkward_server::Config;

#[tokio::test]
async fn test_deadline_returns_partial_result() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let app = app_with(Config {
        total_request_deadline_timeout_seconds: 1,
        total_request_deadline_timeout_seconds_per_url: 0,
        http_client: linkward_server::options::HttpClientConfig {
            timeout_seconds: 10,
            ..Default::default()
        },
        ..Config::default()
    })
    .await;

    let urls = check_body(&[
        ("1", &format!("{}/a", server.uri())),
        ("2", &format!("{}/b", server.uri())),
    ]);
    let (status, body) = post_json(&app, "/checkUrls", urls).await;
    assert_eq!(status, StatusCode::OK);

    let response = parse_batch(&body);
    assert_eq!(response["result"], "partial");
    assert!(response["urls"].as_array().unwrap().len() < 2);
}
