use crate::shared::shutdown::ShutdownSignal;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Delay doubles after each failed attempt.
    Exponential,
    /// Delay grows by a fixed step after each failed attempt.
    Linear(Duration),
}

/// Bounded polling/backoff contract: interval, growth, cap, jitter, attempt
/// budget and overall deadline are all explicit so loops stay testable on a
/// paused runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub cap: Duration,
    pub growth: Growth,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
    pub jitter: Duration,
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Attempt budget or deadline ran out.
    Exhausted { attempts: u32, last: Option<E> },
    /// The shutdown signal was observed between attempts.
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } | Self::Cancelled { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => match last {
                Some(err) => write!(f, "gave up after {attempts} attempt(s): {err}"),
                None => write!(f, "gave up after {attempts} attempt(s)"),
            },
            Self::Cancelled { attempts, .. } => {
                write!(f, "cancelled by shutdown after {attempts} attempt(s)")
            }
        }
    }
}

impl RetryPolicy {
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            cap: interval,
            growth: Growth::Linear(Duration::ZERO),
            max_attempts: None,
            deadline: None,
            jitter: Duration::ZERO,
        }
    }

    pub const fn exponential(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            growth: Growth::Exponential,
            max_attempts: None,
            deadline: None,
            jitter: Duration::ZERO,
        }
    }

    pub const fn linear(initial: Duration, step: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            growth: Growth::Linear(step),
            max_attempts: None,
            deadline: None,
            jitter: Duration::ZERO,
        }
    }

    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay slept after the given failed attempt (1-based), jitter excluded.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt.max(1) {
            delay = self.grow(delay);
            if delay >= self.cap {
                return self.cap;
            }
        }
        delay.min(self.cap)
    }

    fn grow(&self, delay: Duration) -> Duration {
        let next = match self.growth {
            Growth::Exponential => delay.saturating_mul(2),
            Growth::Linear(step) => delay.saturating_add(step),
        };
        next.min(self.cap)
    }

    fn jitter_sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut bytes = [0u8; 8];
        if let Err(e) = getrandom::fill(&mut bytes) {
            log::debug!("Jitter source unavailable, skipping jitter: {e}");
            return Duration::ZERO;
        }
        let span = self.jitter.as_millis().max(1) as u64;
        Duration::from_millis(u64::from_le_bytes(bytes) % span)
    }

    /// Runs `op` until it succeeds, the budget runs out, or shutdown is seen.
    ///
    /// `op` receives the 1-based attempt number. The shutdown flag is checked
    /// before every attempt; an attempt already in flight runs to completion.
    pub async fn run<T, E, F, Fut>(
        &self,
        shutdown: &ShutdownSignal,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut delay = self.initial;
        let mut attempt: u32 = 0;
        let mut last = None;

        loop {
            if shutdown.is_triggered() {
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last,
                });
            }

            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => last = Some(err),
            }

            if self.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
            if self
                .deadline
                .is_some_and(|deadline| started.elapsed() >= deadline)
            {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }

            tokio::time::sleep(delay + self.jitter_sample()).await;
            delay = self.grow(delay);

            if self
                .deadline
                .is_some_and(|deadline| started.elapsed() >= deadline)
            {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
        }
    }
}
