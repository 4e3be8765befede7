//! Wait for a submitted analysis to finish.
//!
//! Polling is a small state machine. A job starts out [`JobState::Running`]
//! and each status check either leaves it there or moves it to one of the
//! terminal states. Once a job is terminal we stop checking, so a job that
//! fails on check *k* never sees check *k + 1*.
//!
//! Every wait and every status check races the caller's
//! [`CancellationToken`] and the policy's deadline, so a caller can abandon a
//! job without waiting for the attempt budget to run out.

use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    error::OcrError,
    prelude::*,
    read_api::{JobHandle, ReadOperation, ReadTransport, RecognitionResult, RemoteStatus},
};

use super::policy::PollPolicy;

/// Where a job stands, as far as we know.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Not finished yet.
    Running,
    /// Finished, with a result.
    Succeeded(RecognitionResult),
    /// The service gave up on the job.
    Failed {
        /// Why we consider it failed.
        reason: String,
    },
    /// We gave up waiting.
    TimedOut,
}

impl JobState {
    /// Is this a state we never leave?
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }

    /// Apply a status report. Terminal states ignore further reports.
    pub fn advance(self, report: ReadOperation) -> JobState {
        if self.is_terminal() {
            return self;
        }
        match report.status {
            RemoteStatus::NotStarted | RemoteStatus::Running => JobState::Running,
            RemoteStatus::Succeeded => match report.analyze_result {
                Some(result) => JobState::Succeeded(result),
                None => JobState::Failed {
                    reason: "service reported success without a result".to_owned(),
                },
            },
            RemoteStatus::Failed => JobState::Failed {
                reason: "service reported the analysis as failed".to_owned(),
            },
        }
    }
}

/// Poll `handle` until it finishes, following `policy`.
///
/// `guard` carries the caller's cancellation token and deadline. The
/// deadline clock starts when the guard is created, not here.
#[instrument(level = "debug", skip_all, fields(%handle))]
pub async fn await_completion(
    transport: &dyn ReadTransport,
    handle: &JobHandle,
    policy: &PollPolicy,
    guard: &Guard<'_>,
) -> Result<RecognitionResult, OcrError> {
    let mut state = JobState::Running;
    let mut attempt = 0;
    loop {
        state = match state {
            JobState::Running if attempt >= policy.max_attempts => JobState::TimedOut,
            JobState::Running => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                trace!(attempt, ?delay, "Waiting before status check");
                guard
                    .run(async {
                        time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                let report = guard.run(transport.query(handle)).await?;
                debug!(attempt, status = ?report.status, "Status check");
                JobState::Running.advance(report)
            }
            JobState::Succeeded(result) => {
                debug!(attempt, pages = result.pages.len(), "Analysis succeeded");
                return Ok(result);
            }
            JobState::Failed { reason } => {
                warn!(attempt, %reason, "Analysis failed");
                return Err(OcrError::RemoteProcessingFailure { attempt, reason });
            }
            JobState::TimedOut => {
                warn!(attempts = attempt, "Analysis still running, giving up");
                return Err(OcrError::PollTimeout { attempts: attempt });
            }
        };
    }
}

/// Races work against cancellation and the deadline.
pub struct Guard<'a> {
    cancel: &'a CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl<'a> Guard<'a> {
    /// Start the deadline clock now. A deadline too far away to represent
    /// is the same as no deadline.
    pub fn new(deadline: Option<Duration>, cancel: &'a CancellationToken) -> Self {
        let deadline = deadline.and_then(|limit| {
            let at = Instant::now().checked_add(limit);
            if at.is_none() {
                debug!(?limit, "Deadline is out of range, ignoring it");
            }
            at.map(|at| (at, limit))
        });
        Self { cancel, deadline }
    }

    /// Run `work` unless we are cancelled or out of time first.
    pub async fn run<T>(
        &self,
        work: impl Future<Output = Result<T, OcrError>>,
    ) -> Result<T, OcrError> {
        let deadline_passed = async {
            match self.deadline {
                Some((at, _)) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OcrError::Cancelled),
            _ = deadline_passed => Err(OcrError::DeadlineExceeded {
                deadline: self.deadline.map(|(_, limit)| limit).unwrap_or_default(),
            }),
            result = work => result,
        }
    }
}
