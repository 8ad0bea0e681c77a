//! Bounded retries driven by an error classifier

use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff, FixedInterval};
use tokio_retry::RetryIf;

/// What to do with a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Worth calling again
    Retry,
    /// Give up quietly; the caller treats the call as producing nothing
    Abstain,
    /// Give up and surface the error
    Fatal,
}

/// Errors that know how they should be retried
pub trait Classify {
    fn verdict(&self) -> Verdict;
}

/// Delay schedule between retries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// Exponential from `base_ms` with jitter, capped at `max`
    Exponential { base_ms: u64, max: Duration },
}

/// Final result of a retried call
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Done(T),
    /// Error that should not abort the caller (includes exhausted retries)
    Abstained(E),
    Fatal(E),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first call
    pub max_retries: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    fn schedule(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self.backoff {
            Backoff::Fixed(delay) => Box::new(FixedInterval::new(delay).take(self.max_retries)),
            Backoff::Exponential { base_ms, max } => Box::new(
                ExponentialBackoff::from_millis(base_ms)
                    .max_delay(max)
                    .map(jitter)
                    .take(self.max_retries),
            ),
        }
    }

    /// Run `action` until it succeeds, its error is not retryable, or the schedule runs out
    pub async fn run<T, E, F, Fut>(&self, action: F) -> RetryOutcome<T, E>
    where
        E: Classify + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let condition = |e: &E| {
            let retry = e.verdict() == Verdict::Retry;
            if retry {
                tracing::warn!("Retryable error: {}", e);
            }
            retry
        };

        match RetryIf::start(self.schedule(), action, condition).await {
            Ok(value) => RetryOutcome::Done(value),
            Err(e) => match e.verdict() {
                Verdict::Fatal => RetryOutcome::Fatal(e),
                Verdict::Retry | Verdict::Abstain => RetryOutcome::Abstained(e),
            },
        }
    }
}
