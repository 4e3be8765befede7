use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::prelude::*;

mod cmd;
mod config;
mod error;
mod ocr;
mod prelude;
mod rate_limit;
mod read_api;
mod server;

/// Extract text from images using the Azure Read API.
#[derive(Debug, Parser)]
#[clap(
    version,
    after_help = r#"
Environment Variables:
  - AZURE_SUBSCRIPTION_KEY: The Computer Vision subscription key.
  - AZURE_ENDPOINT: The Computer Vision endpoint URL.
  - PORT (optional): The port for `serve` to listen on.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Serve `POST /api/ocr`, which accepts a multipart `file` upload.
    Serve(cmd::serve::ServeOpts),
    /// Recognize a single image file and print its text.
    Recognize(cmd::recognize::RecognizeOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists. This must
    // happen before we parse arguments, because some flags fall back to the
    // environment.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Serve(opts) => {
            cmd::serve::cmd_serve(opts).await?;
        }
        Cmd::Recognize(opts) => {
            cmd::recognize::cmd_recognize(
                &opts.input_path,
                opts.output_path.as_deref(),
                &opts.read_api,
                &opts.poll,
            )
            .await?;
        }
    }
    Ok(())
}
