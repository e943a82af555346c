//! Retry policy shared by every remote call
//!
//! One loop replaces the per-call retry bodies. The caller supplies the
//! operation and a classifier that sorts each failure into one of three
//! classes:
//!
//! - [`RetryClass::RetryNow`]: transient; wait `retry_delay` and try again,
//!   at most `max_retries` attempts in total
//! - [`RetryClass::RetryAfterCooldown`]: the remote is throttling us; the
//!   `on_retry` hook drops the connection, then we wait `cooldown`. Counted
//!   against `max_cooldowns`, independent of the transient budget
//! - [`RetryClass::Fatal`]: returned immediately
//!
//! # Examples
//!
//! ```rust,ignore
//! let listing = policy
//!     .run(
//!         "list partitions",
//!         || source.list_partitions(),
//!         RemoteError::retry_class,
//!         |_| source.disconnect(),
//!     )
//!     .await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum number of attempts for transient failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed delay between transient retries (seconds)
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Wait after a connection-limit signal (seconds)
pub const DEFAULT_COOLDOWN_SECS: u64 = 70;

/// Number of cooldowns tolerated for a single operation
pub const DEFAULT_MAX_COOLDOWNS: u32 = 3;

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    RetryNow,
    RetryAfterCooldown,
    Fatal,
}

/// Failure returned once the policy gives up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{label} failed with a non-retryable error: {error}")]
    Fatal { label: String, error: E },

    #[error("{label} failed after {attempts} attempts: {error}")]
    Exhausted {
        label: String,
        attempts: u32,
        error: E,
    },

    #[error("{label} cancelled while waiting to retry: {error}")]
    Cancelled { label: String, error: E },
}

impl<E> RetryError<E> {
    /// The last error reported by the operation
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { error, .. }
            | RetryError::Exhausted { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Retry budget and delays
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cooldown: Duration,
    pub max_cooldowns: u32,
    cancel: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            max_cooldowns: DEFAULT_MAX_COOLDOWNS,
            cancel: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration, cooldown: Duration, max_cooldowns: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
            cooldown,
            max_cooldowns,
            cancel: None,
        }
    }

    /// Abort waits as soon as `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// `on_retry` runs before every wait with the class of the failure that
    /// caused it; the harvester uses it to drop a broken connection.
    pub async fn run<T, E, Op, Fut, Cl, Hook, HookFut>(
        &self,
        label: &str,
        mut op: Op,
        classify: Cl,
        mut on_retry: Hook,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Cl: Fn(&E) -> RetryClass,
        Hook: FnMut(RetryClass) -> HookFut,
        HookFut: Future<Output = ()>,
        E: Display,
    {
        let mut failures = 0u32;
        let mut cooldowns = 0u32;

        loop {
            let error = match op().await {
                Ok(value) => {
                    if failures > 0 || cooldowns > 0 {
                        debug!(label, failures, cooldowns, "Succeeded after retrying");
                    }
                    return Ok(value);
                },
                Err(e) => e,
            };

            let class = classify(&error);
            let delay = match class {
                RetryClass::Fatal => {
                    return Err(RetryError::Fatal {
                        label: label.to_string(),
                        error,
                    });
                },
                RetryClass::RetryNow => {
                    failures += 1;
                    if failures >= self.max_retries {
                        return Err(RetryError::Exhausted {
                            label: label.to_string(),
                            attempts: failures + cooldowns,
                            error,
                        });
                    }
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {}s...",
                        label,
                        failures,
                        self.max_retries,
                        error,
                        self.retry_delay.as_secs()
                    );
                    self.retry_delay
                },
                RetryClass::RetryAfterCooldown => {
                    if cooldowns >= self.max_cooldowns {
                        return Err(RetryError::Exhausted {
                            label: label.to_string(),
                            attempts: failures + cooldowns + 1,
                            error,
                        });
                    }
                    cooldowns += 1;
                    warn!(
                        "{} hit the remote connection limit ({}), cooling down for {}s (cooldown {}/{})",
                        label,
                        error,
                        self.cooldown.as_secs(),
                        cooldowns,
                        self.max_cooldowns
                    );
                    self.cooldown
                },
            };

            on_retry(class).await;

            if !self.pause(delay).await {
                return Err(RetryError::Cancelled {
                    label: label.to_string(),
                    error,
                });
            }
        }
    }

    /// Sleep for `delay`; false when cancelled first
    async fn pause(&self, delay: Duration) -> bool {
        match self.cancel {
            Some(ref token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            },
        }
    }
}
