//! Blacklisted hosts are answered without any network I/O.

mod common;

use pretty_assertions::assert_eq;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{app_with, check_body, parse_batch, post_json};
use linkward_server::Config;

#[tokio::test]
async fn test_glob_matches_host_without_port() {
    let app = app_with(Config {
        url_checker_plugins: vec!["_always_ok".to_owned()],
        domain_blacklist_globs: vec!["test?atter*.*".to_owned()],
        ..Config::default()
    })
    .await;

    let (_, body) = post_json(
        &app,
        "/checkUrls",
        check_body(&[
            ("1", "https://testpattern.com"),
            ("2", "https://other.example.com/"),
        ]),
    )
    .await;
    let response = parse_batch(&body);

    for entry in response["urls"].as_array().unwrap() {
        match entry["context"].as_str().unwrap() {
            "1" => {
                assert_eq!(entry["status"], "skipped");
                assert_eq!(entry["http_status"], 528);
                assert!(entry["error"].as_str().unwrap().contains("blacklisted"));
            }
            "2" => assert_eq!(entry["status"], "ok"),
            other => panic!("unexpected context {other}"),
        }
    }
}

#[tokio::test]
async fn test_no_request_leaves_the_service() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = app_with(Config {
        domain_blacklist_globs: vec!["127.0.0.*".to_owned()],
        ..Config::default()
    })
    .await;

    let (_, body) = post_json(&app, "/checkUrls", check_body(&[("1", &server.uri())])).await;
    let response = parse_batch(&body);
    assert_eq!(response["urls"][0]["status"], "skipped");
    assert!(server.received_requests().await.unwrap().is_empty());
}
