//! The linkward web service: batch HTTP link validation.
//!
//! Clients POST lists of URLs to `/checkUrls` (aggregated JSON response)
//! or `/checkUrls/stream` (newline-delimited JSON, flushed per result)
//! and get, for each URL, whether it is reachable, the HTTP status,
//! timing, a per-plugin trace and optional body-pattern matches. The
//! heavy lifting (checker chain, caching, concurrency gate, per-domain
//! rate limiting) lives in `linkward-lib`; this crate adds the endpoint
//! surface, request orchestration and the operational middlewares.
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::cast_possible_truncation)]

pub mod dedup;
pub mod handlers;
pub mod middleware;
pub mod options;
pub mod orchestrator;
pub mod routes;
pub mod serialization;

pub use options::{Config, ServerOptions};
pub use routes::{build_app, build_app_with_state, AppState};
