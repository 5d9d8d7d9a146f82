// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff around a fallible async operation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::Cancelled;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub multiplier: f64,
}

impl RetryOptions {
    /// Wait before attempt `attempt` (0-indexed). The first attempt never waits; after
    /// that the delay grows from `base_delay` by `multiplier`, capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, the attempts run out, `should_retry` rejects an
/// error, or `cancel` fires while waiting between attempts.
///
/// A `None` predicate retries every error. Exhausting the attempts returns the last error.
pub async fn retry<T, E, F, Fut>(
    options: &RetryOptions,
    cancel: &CancellationToken,
    mut operation: F,
    should_retry: Option<&(dyn Fn(&E) -> bool + Sync)>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Cancelled> + Display,
{
    let attempts = options.attempts.max(1);
    let mut attempt = 0;
    loop {
        let delay = options.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    debug!("Retry cancelled before attempt {}", attempt + 1);
                    return Err(Cancelled.into());
                }
            }
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if !should_retry.map_or(true, |retryable| retryable(&err)) {
            debug!("Attempt {attempt} failed with a permanent error: {err}");
            return Err(err);
        }
        if attempt >= attempts {
            warn!("Giving up after {attempt} attempts: {err}");
            return Err(err);
        }
        debug!(
            "Attempt {attempt}/{attempts} failed: {err}, retrying in {:?}",
            options.delay_before(attempt)
        );
    }
}
