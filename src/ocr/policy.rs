//! How long to wait between status checks, and when to stop checking.

use std::time::Duration;

/// Default wait before each status check.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of status checks before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// How the wait grows from one status check to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Always wait the base interval.
    Fixed,
    /// Multiply the wait by `factor` after each check, up to `max_interval`.
    Exponential {
        /// Growth per attempt. At least 1.0.
        factor: f64,
        /// Upper bound on any single wait.
        max_interval: Duration,
    },
}

/// A polling policy for one submitted job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Wait before the first status check.
    pub interval: Duration,

    /// Maximum number of status checks. At least 1.
    pub max_attempts: u32,

    /// How the wait grows.
    pub backoff: Backoff,

    /// Give up once this much time has passed since polling started.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl PollPolicy {
    /// Check every `interval`, at most `max_attempts` times.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed,
            deadline: None,
        }
    }

    /// Grow the wait by `factor` per attempt, never above `max_interval`.
    pub fn with_exponential_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = Backoff::Exponential {
            factor: factor.max(1.0),
            max_interval,
        };
        self
    }

    /// Stop polling once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The wait before status check number `attempt`, counting from 1.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                factor,
                max_interval,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = self.interval.as_secs_f64() * factor.powi(exponent);
                // `secs` may be infinite for long runs with big factors.
                Duration::try_from_secs_f64(secs)
                    .unwrap_or(max_interval)
                    .min(max_interval)
            }
        }
    }

    /// The most time we could spend waiting, ignoring the network.
    pub fn max_total_wait(&self) -> Duration {
        let mut waiting = Duration::ZERO;
        for attempt in 1..=self.max_attempts {
            let delay = self.delay_before(attempt);
            // Once the wait stops growing, the rest of the attempts all cost
            // the same.
            if attempt == self.max_attempts || self.delay_before(attempt + 1) == delay {
                let remaining = self.max_attempts - attempt + 1;
                waiting = waiting.saturating_add(delay.saturating_mul(remaining));
                break;
            }
            waiting = waiting.saturating_add(delay);
        }
        match self.deadline {
            Some(deadline) => waiting.min(deadline),
            None => waiting,
        }
    }
}
