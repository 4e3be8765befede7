//! The OCR pipeline: submit an image, wait for the analysis, flatten the
//! result.
//!
//! Each call to [`OcrPipeline::recognize`] is independent. The pipeline only
//! holds read-only configuration and a shared transport, so one instance can
//! serve any number of concurrent requests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{error::OcrError, prelude::*, read_api::ReadTransport};

use self::policy::PollPolicy;

pub mod extract;
pub mod policy;
pub mod poller;
pub mod submitter;

/// Turns images into text using a remote Read API.
#[derive(Debug, Clone)]
pub struct OcrPipeline {
    /// How we talk to the service.
    transport: Arc<dyn ReadTransport>,

    /// How we wait for results.
    policy: PollPolicy,
}

impl OcrPipeline {
    /// Create a new pipeline.
    pub fn new(transport: Arc<dyn ReadTransport>, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// Recognize the text in `image`.
    ///
    /// Cancelling `cancel` abandons the request at the next suspension point.
    /// The remote job is left to finish on its own. The policy's deadline
    /// covers the whole request, submission included.
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    pub async fn recognize(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> Result<String, OcrError> {
        let guard = poller::Guard::new(self.policy.deadline, cancel);
        let handle = guard
            .run(submitter::submit(self.transport.as_ref(), image))
            .await?;
        let result =
            poller::await_completion(self.transport.as_ref(), &handle, &self.policy, &guard)
                .await?;
        let text = extract::flatten(&result);
        debug!(chars = text.len(), "Extracted text");
        Ok(text)
    }
}
