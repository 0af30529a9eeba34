//! Bounded retry of rate-limited requests.
//!
//! GitHub answers throttled requests with 403 or 429. The
//! [`RetryingClient`] retries those responses a bounded number of times,
//! honouring `Retry-After` when the server sends it and otherwise waiting an
//! escalating fixed delay. Consecutive rate-limit hits are tracked in a
//! [`RateLimitBudget`] shared by every caller of a run, so the limit applies
//! to the run as a whole rather than to each request in isolation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Default number of retries after the first rate-limited attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default step of the escalating delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(60);
/// Upper bound on any single wait, including server-supplied ones.
pub const MAX_DELAY: Duration = Duration::from_secs(15 * 60);

/// Granularity at which [`ThreadSleeper`] re-checks for cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// How rate-limited requests are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first rate-limited response.
    pub max_retries: u32,
    /// Delay multiplied by the attempt number when no `Retry-After` is sent.
    pub base_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (starting at 1).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use resonite_mod_updater::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for(2, None), Duration::from_secs(120));
    /// assert_eq!(
    ///     policy.delay_for(2, Some(Duration::from_secs(5))),
    ///     Duration::from_secs(5)
    /// );
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or_else(|| self.base_delay.saturating_mul(attempt))
            .min(self.max_delay)
    }
}

/// Whether `status` is one of GitHub's rate-limit signals.
#[must_use]
pub const fn is_rate_limited(status: u16) -> bool {
    matches!(status, 403 | 429)
}

/// Consecutive rate-limit hits shared across a run.
#[derive(Debug, Clone, Default)]
pub struct RateLimitBudget(Arc<AtomicU32>);

impl RateLimitBudget {
    /// Record a rate-limited response, returning the new consecutive count.
    pub fn record_hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Clear the count after a response that was not rate limited.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// Current consecutive count.
    #[must_use]
    pub fn consecutive_hits(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cooperative cancellation for a run, with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// A token that is only cancelled explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Cancel every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token was cancelled or its deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left before the deadline, if one was set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Limit `request` so it cannot outlive the deadline.
    #[must_use]
    pub fn bound(&self, request: HttpRequest) -> HttpRequest {
        match self.remaining() {
            Some(left) => request.time_limit(left),
            None => request,
        }
    }
}

/// Waits between retries.
#[cfg_attr(test, mockall::automock)]
pub trait Sleeper {
    /// Wait for `duration`, returning `false` if `token` was cancelled first.
    fn sleep(&self, duration: Duration, token: &CancellationToken) -> bool;
}

/// [`Sleeper`] that blocks the current thread in short slices.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, token: &CancellationToken) -> bool {
        let until = Instant::now() + duration;
        loop {
            if token.is_cancelled() {
                return false;
            }
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            std::thread::sleep(left.min(SLEEP_SLICE));
        }
    }
}

/// Errors surfaced by [`RetryingClient::get`].
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every permitted attempt was rate limited.
    #[error("{url} still rate limited after {attempts} attempts")]
    Exhausted {
        /// The request that was being retried.
        url: String,
        /// Consecutive rate-limited attempts.
        attempts: u32,
    },

    /// The request failed before any response arrived.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The run was cancelled before or between attempts.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// The request that was abandoned.
        url: String,
    },
}

/// An [`HttpClient`] decorator that retries rate-limited responses.
pub struct RetryingClient<'a> {
    client: &'a dyn HttpClient,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
    budget: RateLimitBudget,
    token: CancellationToken,
}

impl<'a> RetryingClient<'a> {
    /// Wrap `client`, sharing `budget` and `token` with the rest of the run.
    #[must_use]
    pub fn new(
        client: &'a dyn HttpClient,
        sleeper: &'a dyn Sleeper,
        policy: RetryPolicy,
        budget: RateLimitBudget,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            sleeper,
            policy,
            budget,
            token,
        }
    }

    /// Send `request`, retrying while the response signals a rate limit.
    ///
    /// Non-rate-limited responses, successful or not, are returned as they
    /// are and reset the shared budget.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Exhausted`] once the budget exceeds the policy's
    /// retry allowance, [`RetryError::Transport`] when the request itself
    /// fails, and [`RetryError::Cancelled`] when the run is cancelled.
    pub fn get(&self, request: &HttpRequest) -> Result<HttpResponse, RetryError> {
        loop {
            if self.token.is_cancelled() {
                return Err(RetryError::Cancelled {
                    url: request.url.clone(),
                });
            }
            let response = match self.client.get(&self.token.bound(request.clone())) {
                Ok(response) => response,
                // A deadline that cut the request short reads as cancellation.
                Err(_) if self.token.is_cancelled() => {
                    return Err(RetryError::Cancelled {
                        url: request.url.clone(),
                    });
                }
                Err(err) => return Err(err.into()),
            };
            if !is_rate_limited(response.status) {
                self.budget.reset();
                return Ok(response);
            }

            let hits = self.budget.record_hit();
            if hits > self.policy.max_retries {
                return Err(RetryError::Exhausted {
                    url: request.url.clone(),
                    attempts: hits,
                });
            }
            let delay = self.policy.delay_for(hits, response.retry_after);
            warn!(
                "attempt {hits}: {} answered HTTP {}; retrying in {}s",
                request.url,
                response.status,
                delay.as_secs()
            );
            if !self.sleeper.sleep(delay, &self.token) {
                debug!("retry wait for {} interrupted", request.url);
                return Err(RetryError::Cancelled {
                    url: request.url.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
