//! Plugin order decides the verdict; the trace records who ran.

mod common;

use pretty_assertions::assert_eq;

use common::{app_with, check_body, parse_batch, post_json};
use linkward_server::Config;

#[tokio::test]
async fn test_first_plugin_wins() {
    let app = app_with(Config {
        url_checker_plugins: vec!["_always_ok".to_owned(), "_always_bad".to_owned()],
        ..Config::default()
    })
    .await;

    let (_, body) = post_json(
        &app,
        "/checkUrls",
        check_body(&[("1", "https://example.com/")]),
    )
    .await;
    let entry = &parse_batch(&body)["urls"][0];
    assert_eq!(entry["status"], "ok");
    let trace = entry["check_trace"].as_array().unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0]["name"], "_always_ok");
}

#[tokio::test]
async fn test_reversed_order_reverses_the_verdict() {
    let app = app_with(Config {
        url_checker_plugins: vec!["_always_bad".to_owned(), "_always_ok".to_owned()],
        ..Config::default()
    })
    .await;

    let (_, body) = post_json(
        &app,
        "/checkUrls",
        check_body(&[("1", "https://example.com/")]),
    )
    .await;
    let entry = &parse_batch(&body)["urls"][0];
    assert_eq!(entry["status"], "broken");
    let trace = entry["check_trace"].as_array().unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0]["name"], "_always_bad");
}
