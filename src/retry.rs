//! Bounded retry with fixed backoff, deadline and cancellation.
//!
//! Every external call (extraction, embedding, rerank, graph store) goes
//! through a [`RetryPolicy`]. Attempts are bounded; between attempts the
//! policy sleeps in short slices so a [`CancelToken`] or deadline stops the
//! loop promptly instead of after the full backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of the cancellable backoff sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared between a caller and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// Stopped by cancellation or deadline before succeeding.
    Cancelled { attempts: u32 },
}

/// Retry configuration for one class of external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
    /// Give up once this instant has passed.
    pub deadline: Option<Instant>,
    /// Give up once this token is cancelled.
    pub cancel: Option<CancelToken>,
}

impl RetryPolicy {
    /// Policy for extraction / embedding / rerank calls: 5 attempts, no pause.
    pub fn oracle() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::ZERO,
            deadline: None,
            cancel: None,
        }
    }

    /// Policy for graph store calls: 3 attempts, 2 s apart.
    pub fn store() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
            deadline: None,
            cancel: None,
        }
    }

    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::oracle()
        }
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// This policy's attempts and backoff, bounded by `outer`'s stop
    /// condition: the earlier deadline applies, and `outer`'s cancel token
    /// replaces this policy's when it has one.
    pub fn within(mut self, outer: &RetryPolicy) -> Self {
        if let Some(deadline) = outer.deadline {
            self.deadline = Some(self.deadline.map_or(deadline, |own| own.min(deadline)));
        }
        if let Some(cancel) = &outer.cancel {
            self.cancel = Some(cancel.clone());
        }
        self
    }

    /// Whether the caller asked us to stop (cancelled or past deadline).
    pub fn should_stop(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run `op` until it succeeds, attempts run out, or the caller stops us.
    ///
    /// `op` receives the 1-based attempt number. Failed attempts are logged at
    /// `debug`; the caller decides how loudly to report the final outcome.
    pub fn run<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=max {
            if self.should_stop() {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                });
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(operation, attempt, max, error = %e, "attempt failed");
                    last = Some(e);
                }
            }
            if attempt < max && !self.pause() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }

        match last {
            Some(last) => Err(RetryError::Exhausted {
                attempts: max,
                last,
            }),
            None => Err(RetryError::Cancelled { attempts: max }),
        }
    }

    /// Sleep for the backoff. Returns `false` if interrupted by a stop request.
    fn pause(&self) -> bool {
        let mut remaining = self.backoff;
        while !remaining.is_zero() {
            if self.should_stop() {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        !self.should_stop()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::oracle()
    }
}
