use std::future::Future;
use std::time::Duration;

use crate::BoxFuture;

/// Suspends the current task; abstracts over the timer primitive.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Copy, Clone)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Resolves immediately. Useful when the retry cadence does not matter.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoDelay;

impl Sleeper for NoDelay {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<E> {
    /// Transient failure; try again if attempts remain.
    Retry(E),
    /// Permanent failure; stop immediately.
    Abort(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub aborted: bool,
    pub last: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.aborted {
            write!(f, "aborted after {} attempt(s): {}", self.attempts, self.last)
        } else {
            write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Runs `op` until it succeeds, aborts, or attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. The delay is only awaited
    /// between attempts, never after the last one.
    pub async fn run<T, E, F, Fut>(&self, sleeper: &dyn Sleeper, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(Attempt::Abort(e)) => {
                    return Err(RetryError {
                        attempts: attempt,
                        aborted: true,
                        last: e,
                    });
                }
                Err(Attempt::Retry(e)) => {
                    if attempt >= max {
                        return Err(RetryError {
                            attempts: attempt,
                            aborted: false,
                            last: e,
                        });
                    }
                    tracing::trace!(attempt, max, "retrying after transient failure");
                    sleeper.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Attempt, NoDelay, RetryPolicy};
    use std::time::Duration;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let out = policy
            .run(&NoDelay, |n| async move {
                if n < 3 {
                    Err(Attempt::Retry("not yet"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(out, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run(&NoDelay, |_| async { Err::<(), _>(Attempt::Retry("down")) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(!err.aborted);
    }

    #[tokio::test]
    async fn abort_stops_immediately() {
        let policy = RetryPolicy::default();
        let err = policy
            .run(&NoDelay, |_| async { Err::<(), _>(Attempt::Abort("bad input")) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(err.aborted);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let out = policy.run(&NoDelay, |n| async move { Ok::<_, Attempt<()>>(n) }).await;
        assert_eq!(out, Ok(1));
    }
}
