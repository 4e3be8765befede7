//! Command-line entry points.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::{PollOpts, ReadApiOpts},
    ocr::OcrPipeline,
    prelude::*,
    read_api::azure::AzureReadClient,
};

pub mod recognize;
pub mod serve;

/// Build a pipeline talking to Azure, using our options.
pub fn build_pipeline(read_api: &ReadApiOpts, poll: &PollOpts) -> Result<OcrPipeline> {
    let policy = poll.to_policy()?;
    let client = AzureReadClient::new(read_api)?;
    info!(
        analyze_url = %client.analyze_url(),
        max_attempts = policy.max_attempts,
        max_wait = ?policy.max_total_wait(),
        "Configured Read API client"
    );
    Ok(OcrPipeline::new(Arc::new(client), policy))
}

/// Return a token which is cancelled when the user presses Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                trigger.cancel();
            }
            Err(err) => warn!("Could not listen for Ctrl-C: {err}"),
        }
    });
    token
}
