//! The `serve` subcommand.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use clap::Args;

use crate::{
    config::{PollOpts, ReadApiOpts},
    prelude::*,
    server::{AppState, DEFAULT_MAX_UPLOAD_BYTES, create_app, serve},
};

use super::{build_pipeline, cancel_on_ctrl_c};

/// Options for the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeOpts {
    /// The address to listen on.
    #[clap(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// The port to listen on.
    #[clap(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Reject uploads larger than this many bytes.
    #[clap(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    #[clap(flatten)]
    pub read_api: ReadApiOpts,

    #[clap(flatten)]
    pub poll: PollOpts,
}

/// Run the `serve` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_serve(opts: &ServeOpts) -> Result<()> {
    let pipeline = build_pipeline(&opts.read_api, &opts.poll)?;
    let shutdown = cancel_on_ctrl_c();
    let state = AppState {
        pipeline: Arc::new(pipeline),
        shutdown: shutdown.clone(),
    };
    let app = create_app(state, opts.max_upload_bytes);
    serve(app, SocketAddr::new(opts.host, opts.port), shutdown).await
}
