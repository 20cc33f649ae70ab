//! Deduplication and result-cache behavior through the batch endpoint.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{app_with, check_body, parse_batch, post_json};
use linkward_server::Config;

#[tokio::test]
async fn test_equivalent_urls_share_one_result() {
    let config = Config {
        url_checker_plugins: vec!["_always_ok".to_owned()],
        ..Config::default()
    };
    let app = app_with(config).await;

    let body = check_body(&[
        ("1", "https://google.com"),
        ("2", "https://google.com  "),
        ("3", "https://google.com/"),
    ]);
    let (status, body) = post_json(&app, "/checkUrls", body).await;
    assert_eq!(status, StatusCode::OK);

    let response = parse_batch(&body);
    assert_eq!(response["result"], "complete");
    let urls = response["urls"].as_array().unwrap();
    assert_eq!(urls.len(), 3);

    let mut contexts: Vec<_> = urls
        .iter()
        .map(|u| u["context"].as_str().unwrap().to_owned())
        .collect();
    contexts.sort();
    assert_eq!(contexts, vec!["1", "2", "3"]);

    // one canonical check, cloned for the duplicates
    let timestamps: Vec<_> = urls.iter().map(|u| u["timestamp"].as_i64().unwrap()).collect();
    assert!(timestamps.iter().all(|t| *t == timestamps[0]));
    for entry in urls {
        assert_eq!(entry["status"], "ok");
    }
}

#[tokio::test]
async fn test_sequential_requests_hit_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = app_with(Config::default()).await;
    let url = server.uri();

    let outgoing_before = linkward_lib::global_stats().get_stats().outgoing_requests;

    let (_, first) = post_json(&app, "/checkUrls", check_body(&[("1", &url)])).await;
    let first = parse_batch(&first);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let (_, second) = post_json(&app, "/checkUrls", check_body(&[("1", &url)])).await;
    let second = parse_batch(&second);

    assert_eq!(
        first["urls"][0]["timestamp"].as_i64().unwrap(),
        second["urls"][0]["timestamp"].as_i64().unwrap(),
    );

    let outgoing_after = linkward_lib::global_stats().get_stats().outgoing_requests;
    assert_eq!(outgoing_after - outgoing_before, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
