//! Outbound rate limits for calls to the Read API.
//!
//! Azure enforces per-key quotas (the free tier allows 20 calls a minute,
//! paid tiers allow 10 a second). Both analyze and status requests count
//! against them, so a busy server can run into `429 Too Many Requests` long
//! before its own jobs time out.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// The period over which a rate limit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPeriod {
    /// Per second.
    Second,
    /// Per minute.
    Minute,
}

impl RateLimitPeriod {
    /// The length of this period.
    pub fn to_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitPeriod::Second => write!(f, "s"),
            RateLimitPeriod::Minute => write!(f, "m"),
        }
    }
}

impl FromStr for RateLimitPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s" => Ok(RateLimitPeriod::Second),
            "m" => Ok(RateLimitPeriod::Minute),
            _ => Err(anyhow!("Unsupported rate limit period: {:?}", s)),
        }
    }
}

/// A limit on outbound requests, written as `"10/s"` or `"20/m"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// The maximum number of requests allowed in the period. Never zero.
    pub max_requests: usize,
    /// The period over which the rate limit is applied.
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    /// Create a new [`RateLimit`].
    pub fn new(max_requests: usize, per_period: RateLimitPeriod) -> Self {
        Self {
            max_requests: max_requests.max(1),
            per_period,
        }
    }

    /// How often a single request token is returned to the bucket.
    pub fn refill_interval(&self) -> Duration {
        let requests = u32::try_from(self.max_requests).unwrap_or(u32::MAX).max(1);
        (self.per_period.to_duration() / requests).max(Duration::from_millis(1))
    }

    /// Create a [`RateLimiter`] for this rate limit.
    ///
    /// The bucket starts full, so a burst of up to `max_requests` goes out
    /// immediately. After that, tokens trickle back one at a time, spread
    /// evenly over the period, which keeps `20/m` from turning into a burst of
    /// 20 followed by a silent minute.
    pub fn to_rate_limiter(&self) -> RateLimiter {
        RateLimiter::builder()
            .initial(self.max_requests)
            .refill(1)
            .max(self.max_requests)
            .interval(self.refill_interval())
            .build()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.per_period)
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let (max_requests, per_period) = s
                .split_once('/')
                .ok_or_else(|| anyhow!("Expected a value like \"10/s\""))?;
            let max_requests = max_requests.trim().parse::<usize>()?;
            if max_requests == 0 {
                return Err(anyhow!("Rate limit must allow at least one request"));
            }
            let per_period = per_period.trim().parse::<RateLimitPeriod>()?;
            Ok(Self::new(max_requests, per_period))
        };
        parse(s).with_context(|| format!("Failed to parse rate limit: {:?}", s))
    }
}
