//! The ordered chain of checker plugins executed per URL.
//!
//! Plugins run in configuration order. Each one receives the previous
//! plugin's result and decides whether to pass it on, replace it, or abort
//! the chain. The chain also stops as soon as a plugin settles on a code
//! that is not retryable, and records a per-plugin trace entry for every
//! invocation.

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::retry::RetryExt;
use crate::types::{CheckResult, PluginTrace};
use crate::{ErrorKind, Result};

/// One low-level URL checker in a chain of checkers.
#[async_trait]
pub trait CheckerPlugin: Send + Sync + std::fmt::Debug {
    /// Name of the plugin, used in logging and result traces.
    fn name(&self) -> &str;

    /// Check `url`, given the previous plugin's result (if any).
    ///
    /// Returns the next result and whether the chain should stop here.
    /// `token` cancels the check prematurely.
    async fn check(
        &self,
        token: &CancellationToken,
        url: &str,
        last: Option<CheckResult>,
    ) -> (CheckResult, bool);
}

/// Ordered list of [`CheckerPlugin`]s invoked in sequence.
#[derive(Debug)]
pub struct CheckerChain {
    plugins: Vec<Box<dyn CheckerPlugin>>,
}

impl CheckerChain {
    /// Builds a chain from the given plugins. At least one plugin is
    /// required.
    pub fn new(plugins: Vec<Box<dyn CheckerPlugin>>) -> Result<Self> {
        if plugins.is_empty() {
            return Err(ErrorKind::EmptyCheckerChain);
        }
        Ok(Self { plugins })
    }

    /// Runs the chain for one URL and returns the final result, carrying
    /// the accumulated trace and total elapsed time.
    pub async fn check(&self, token: &CancellationToken, url: &str) -> CheckResult {
        let started = Instant::now();
        let mut trace = Vec::with_capacity(self.plugins.len());
        let mut last: Option<CheckResult> = None;

        for plugin in &self.plugins {
            let attempt = Instant::now();
            let (res, abort) = plugin.check(token, url, last.take()).await;
            trace.push(PluginTrace {
                name: plugin.name().to_owned(),
                code: res.code,
                elapsed_ms: attempt.elapsed().as_millis() as u64,
                error: res.error.clone(),
            });
            let stop = abort || !res.code.should_retry();
            last = Some(res);
            if stop {
                break;
            }
        }

        // new() rejects empty chains, so at least one plugin has run
        let mut res = last.expect("checker chain cannot be empty");
        res.checker_trace = trace;
        res.elapsed_ms = started.elapsed().as_millis() as u64;
        res
    }
}
