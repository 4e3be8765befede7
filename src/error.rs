//! Ways a single OCR request can fail.
//!
//! Everything below the HTTP handler and the `recognize` command speaks
//! [`OcrError`], so callers can tell a rejected upload from a job that never
//! finished. The HTTP layer deliberately collapses all of these into one
//! generic response, and only the logs see the difference.

use std::time::Duration;

use thiserror::Error;

/// An error which occurred while recognizing one image.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The analyze request was rejected, or never reached the service.
    #[error("could not submit image for analysis")]
    Submission(#[source] anyhow::Error),

    /// The service accepted the job, then reported it as failed.
    #[error("analysis failed on status check {attempt}: {reason}")]
    RemoteProcessingFailure {
        /// The status check which observed the failure.
        attempt: u32,
        /// What the service (or its response) told us.
        reason: String,
    },

    /// We ran out of status checks while the job was still running.
    #[error("analysis still running after {attempts} status checks")]
    PollTimeout {
        /// How many status checks we made.
        attempts: u32,
    },

    /// A status check failed at the network or protocol level.
    #[error("could not check analysis status")]
    Transport(#[source] anyhow::Error),

    /// The caller gave up on this request.
    #[error("analysis was cancelled")]
    Cancelled,

    /// The overall deadline for this request passed.
    #[error("analysis did not finish within {deadline:?}")]
    DeadlineExceeded {
        /// The deadline we were given.
        deadline: Duration,
    },
}

impl OcrError {
    /// A short, stable name for this kind of error, for use in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::Submission(_) => "submission",
            OcrError::RemoteProcessingFailure { .. } => "remote_processing_failure",
            OcrError::PollTimeout { .. } => "poll_timeout",
            OcrError::Transport(_) => "transport",
            OcrError::Cancelled => "cancelled",
            OcrError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}
