//! Endpoint handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use linkward_lib::{
    binary_version, global_stats, instance_id, running_since_epoch_seconds,
};

use crate::orchestrator::{start_checks, CheckRun};
use crate::routes::AppState;
use crate::serialization::{CheckUrlsRequest, CheckUrlsResponse};

/// POST /checkUrls: batch check, single JSON response.
pub async fn check_urls(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    global_stats().on_incoming_request();
    let request = match parse_check_request(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    // a dropped guard (disconnected client) propagates to every worker
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();

    let response = check_urls_in_parallel(state, request, &token).await;

    // on deadline or completion the remaining workers wind down on their
    // own, bounded by the gate and the per-URL HTTP timeout
    drop(guard.disarm());

    if response.result == "aborted" {
        // nobody is listening anymore
        return StatusCode::OK.into_response();
    }
    Json(response).into_response()
}

async fn check_urls_in_parallel(
    state: Arc<AppState>,
    request: CheckUrlsRequest,
    token: &CancellationToken,
) -> CheckUrlsResponse {
    let CheckRun {
        dedup,
        mut results,
        deadline,
    } = start_checks(state, request.urls, token);

    let deadline = tokio::time::sleep(deadline);
    tokio::pin!(deadline);

    let mut collected = Vec::new();
    loop {
        tokio::select! {
            () = &mut deadline => {
                log::info!("Deadline reached, returning a partial result.");
                return CheckUrlsResponse {
                    urls: dedup.all_results_deduplicated(collected),
                    result: "partial".to_owned(),
                };
            }
            () = token.cancelled() => {
                log::info!("Client disconnected, aborting processing.");
                return CheckUrlsResponse {
                    urls: dedup.all_results_deduplicated(collected),
                    result: "aborted".to_owned(),
                };
            }
            maybe = results.recv() => match maybe {
                Some(result) => collected.push(result),
                None => {
                    return CheckUrlsResponse {
                        urls: dedup.all_results_deduplicated(collected),
                        result: "complete".to_owned(),
                    };
                }
            }
        }
    }
}

/// POST /checkUrls/stream: batch check, one JSON object per line,
/// flushed as results complete.
pub async fn check_urls_stream(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    global_stats().on_incoming_stream_request();
    let request = match parse_check_request(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let token = CancellationToken::new();
    // the guard lives in the pump task: when the pump stops (deadline,
    // completion, or the client closing the stream) the workers stop too
    let guard = token.clone().drop_guard();

    let CheckRun {
        dedup,
        mut results,
        deadline,
    } = start_checks(state, request.urls, &token);

    let (line_tx, line_rx) = tokio::sync::mpsc::channel::<Result<String, Infallible>>(1);
    tokio::spawn(async move {
        let deadline = tokio::time::sleep(deadline);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => {
                    log::info!("Deadline reached, aborting the stream.");
                    // in-flight workers wind down on their own
                    drop(guard.disarm());
                    return;
                }
                () = token.cancelled() => {
                    log::info!("Stream cancelled, aborting.");
                    drop(guard);
                    return;
                }
                maybe = results.recv() => match maybe {
                    Some(result) => {
                        for entry in dedup.deduplicated_results_for(&result) {
                            let Ok(mut line) = serde_json::to_string(&entry) else {
                                continue;
                            };
                            line.push('\n');
                            if line_tx.send(Ok(line)).await.is_err() {
                                log::info!("Client closed the connection, aborting the stream.");
                                return;
                            }
                        }
                    }
                    None => return,
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(ReceiverStream::new(line_rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Parses and gates the request body: malformed JSON and empty lists are
/// 400, oversized lists are 413, all with plain-text bodies.
fn parse_check_request(
    state: &AppState,
    body: &Bytes,
) -> Result<CheckUrlsRequest, Response> {
    let request: CheckUrlsRequest = serde_json::from_slice(body).map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            format!("Could not parse json: {err}"),
        )
            .into_response()
    })?;

    let count = request.urls.len() as u64;
    if state.max_urls_in_request != 0 && count > state.max_urls_in_request {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            "Number of URLs in request limit exceeded",
        )
            .into_response());
    }
    if count == 0 {
        return Err((StatusCode::BAD_REQUEST, "No URLs in request body").into_response());
    }
    Ok(request)
}

/// GET /version: plain text service version.
pub async fn get_version() -> &'static str {
    binary_version()
}

/// GET /livez, /readyz: always up for now.
pub async fn get_health_status() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "UP" }))
}

fn stats_headers() -> [(&'static str, String); 2] {
    [
        ("x-instance-id", instance_id().to_owned()),
        ("x-running-since", running_since_epoch_seconds().to_string()),
    ]
}

/// GET /stats: JSON counters plus instance and uptime headers.
pub async fn get_stats() -> impl IntoResponse {
    (stats_headers(), Json(global_stats().get_stats()))
}

/// GET /stats/domains: JSON per-domain stats plus the same headers.
pub async fn get_domain_stats() -> impl IntoResponse {
    (stats_headers(), Json(global_stats().get_domain_stats()))
}
