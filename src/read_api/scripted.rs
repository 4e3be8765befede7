//! A [`ReadTransport`] that plays back a script, for tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::time;

use crate::{error::OcrError, prelude::*};

use super::{JobHandle, ReadOperation, ReadTransport, RecognitionResult, RemoteStatus};

/// What a scripted status check returns.
#[derive(Debug)]
enum Reply {
    Report(ReadOperation),
    NetworkError,
}

/// Scripted transport. Status checks pop replies off the script in order,
/// and once the script runs out every check reports `running`.
#[derive(Debug)]
pub struct ScriptedTransport {
    /// `None` means the analyze request is rejected.
    location: Option<String>,
    /// How long the analyze request takes.
    submit_delay: Duration,
    replies: Mutex<VecDeque<Reply>>,
    submits: AtomicUsize,
    queries: AtomicUsize,
}

impl ScriptedTransport {
    /// A transport whose analyze request succeeds.
    pub fn accepting() -> Self {
        Self {
            location: Some(
                "https://example.cognitiveservices.azure.com/vision/v3.2/read/analyzeResults/job-1"
                    .to_owned(),
            ),
            submit_delay: Duration::ZERO,
            replies: Mutex::new(VecDeque::new()),
            submits: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// A transport whose analyze request fails.
    pub fn rejecting() -> Self {
        Self {
            location: None,
            ..Self::accepting()
        }
    }

    /// Make the analyze request take `delay`.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    /// Queue a status report with no result.
    pub fn then_status(self, status: RemoteStatus) -> Self {
        self.then(Reply::Report(ReadOperation::with_status(status)))
    }

    /// Queue a successful report.
    pub fn then_succeeded(self, result: RecognitionResult) -> Self {
        self.then(Reply::Report(ReadOperation::succeeded(result)))
    }

    /// Queue a failed status check.
    pub fn then_network_error(self) -> Self {
        self.then(Reply::NetworkError)
    }

    fn then(self, reply: Reply) -> Self {
        self.replies
            .lock()
            .expect("lock poisoned")
            .push_back(reply);
        self
    }

    /// How many analyze requests were made.
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// How many status checks were made.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadTransport for ScriptedTransport {
    async fn submit(&self, _image: Bytes) -> Result<JobHandle, OcrError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        time::sleep(self.submit_delay).await;
        match &self.location {
            Some(location) => Ok(JobHandle::new(location).expect("scripted location")),
            None => Err(OcrError::Submission(anyhow!(
                "analyze request returned 401 Unauthorized"
            ))),
        }
    }

    async fn query(&self, _handle: &JobHandle) -> Result<ReadOperation, OcrError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().expect("lock poisoned").pop_front();
        match reply {
            Some(Reply::Report(report)) => Ok(report),
            Some(Reply::NetworkError) => {
                Err(OcrError::Transport(anyhow!("connection reset by peer")))
            }
            None => Ok(ReadOperation::with_status(RemoteStatus::Running)),
        }
    }
}
