//! Bounded retry with a backoff schedule.
//!
//! Port allocation and backend startup both retry the same way: a fixed
//! number of attempts, a schedule of sleeps between them, and a predicate that
//! decides whether an error is worth another attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration shared by the port allocator and the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Treated as at least 1.
    pub max_attempts: usize,
    /// Sleep before attempt `n + 1` is `backoff[min(n - 1, len - 1)]`.
    /// An empty schedule retries immediately.
    pub backoff: Vec<Duration>,
}

/// The final error after a policy gave up, with the number of attempts made.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: usize,
    pub last: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy with the same delay between every attempt.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self::new(max_attempts, vec![delay])
    }

    /// Run once, never retry.
    pub fn once() -> Self {
        Self::new(1, Vec::new())
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = attempt.saturating_sub(1).min(self.backoff.len() - 1);
        self.backoff[index]
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut op: F,
        retryable: P,
    ) -> std::result::Result<T, RetryExhausted<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= max_attempts || !retryable(&err) {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        "Attempt {}/{} failed, retrying in {}ms",
                        attempt,
                        max_attempts,
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}
