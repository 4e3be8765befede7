//! Start an analysis.

use crate::{
    error::OcrError,
    prelude::*,
    read_api::{JobHandle, ReadTransport},
};

/// Upload `image` exactly once and return the handle to poll.
///
/// There is no retry here. An empty image is rejected without calling the
/// service at all.
#[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
pub async fn submit(transport: &dyn ReadTransport, image: Bytes) -> Result<JobHandle, OcrError> {
    if image.is_empty() {
        return Err(OcrError::Submission(anyhow!("Image is empty")));
    }
    let handle = transport.submit(image).await?;
    debug!(%handle, "Submitted image");
    Ok(handle)
}
