//! Settings shared by every OCR request.
//!
//! These are parsed once at startup (from flags, the environment, or a `.env`
//! file) and then handed to constructors by value. Nothing reads the
//! environment after that.

use std::{convert::Infallible, fmt, str::FromStr, time::Duration};

use clap::Args;

use crate::{ocr::policy::PollPolicy, prelude::*, rate_limit::RateLimit};

/// A Read API subscription key. Kept out of `Debug` output, because we log
/// our parsed options.
#[derive(Clone, PartialEq, Eq)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// The raw key, for the request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubscriptionKey(<redacted>)")
    }
}

impl FromStr for SubscriptionKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_owned()))
    }
}

/// How to reach the Read API.
#[derive(Args, Clone, Debug)]
pub struct ReadApiOpts {
    /// The Computer Vision subscription key.
    #[clap(long, env = "AZURE_SUBSCRIPTION_KEY", hide_env_values = true)]
    pub subscription_key: SubscriptionKey,

    /// The Computer Vision endpoint, for example
    /// `https://my-resource.cognitiveservices.azure.com`.
    #[clap(long, env = "AZURE_ENDPOINT")]
    pub endpoint: String,

    /// A timeout, in seconds, for each individual call to the Read API.
    #[clap(long, default_value = "30")]
    pub request_timeout_secs: u64,

    /// A rate limit for Read API calls, of the form "10/s" or "20/m". Both
    /// uploads and status checks count.
    #[clap(long)]
    pub rate_limit: Option<RateLimit>,
}

impl ReadApiOpts {
    /// The per-call timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How to wait for a submitted job.
#[derive(Args, Clone, Debug)]
pub struct PollOpts {
    /// Wait this long, in milliseconds, before each status check.
    #[clap(long, default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Give up after this many status checks.
    #[clap(long, default_value = "10")]
    pub max_attempts: u32,

    /// Multiply the wait by this factor after each status check. The default
    /// of 1.0 keeps a fixed interval.
    #[clap(long, default_value = "1.0")]
    pub backoff_factor: f64,

    /// Never wait longer than this, in milliseconds, between status checks.
    /// Only matters with `--backoff-factor` above 1.0.
    #[clap(long, default_value = "30000")]
    pub max_poll_interval_ms: u64,

    /// Give up on a request this many seconds after it starts, counting the
    /// upload, even if status checks remain.
    #[clap(long)]
    pub deadline_secs: Option<u64>,
}

impl Default for PollOpts {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_attempts: 10,
            backoff_factor: 1.0,
            max_poll_interval_ms: 30_000,
            deadline_secs: None,
        }
    }
}

impl PollOpts {
    /// Check these options and build a [`PollPolicy`].
    pub fn to_policy(&self) -> Result<PollPolicy> {
        if self.max_attempts == 0 {
            return Err(anyhow!("--max-attempts must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(anyhow!(
                "--backoff-factor must be a number no smaller than 1.0, got {}",
                self.backoff_factor
            ));
        }
        let interval = Duration::from_millis(self.poll_interval_ms);
        let mut policy = PollPolicy::fixed(interval, self.max_attempts);
        if self.backoff_factor > 1.0 {
            policy = policy.with_exponential_backoff(
                self.backoff_factor,
                Duration::from_millis(self.max_poll_interval_ms),
            );
        }
        if let Some(deadline_secs) = self.deadline_secs {
            policy = policy.with_deadline(Duration::from_secs(deadline_secs));
        }
        Ok(policy)
    }
}
