//! The `recognize` subcommand.

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use crate::{
    config::{PollOpts, ReadApiOpts},
    prelude::*,
};

use super::{build_pipeline, cancel_on_ctrl_c};

/// Options for the `recognize` subcommand.
#[derive(Debug, Args)]
pub struct RecognizeOpts {
    /// The image to recognize.
    pub input_path: PathBuf,

    /// Where to write the text. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub read_api: ReadApiOpts,

    #[clap(flatten)]
    pub poll: PollOpts,
}

/// Run the `recognize` subcommand.
#[instrument(level = "debug", skip_all, fields(input = %input_path.display()))]
pub async fn cmd_recognize(
    input_path: &Path,
    output_path: Option<&Path>,
    read_api: &ReadApiOpts,
    poll: &PollOpts,
) -> Result<()> {
    let image = tokio::fs::read(input_path)
        .await
        .with_context(|| format!("Failed to read image {}", input_path.display()))?;
    let pipeline = build_pipeline(read_api, poll)?;
    let cancel = cancel_on_ctrl_c();

    let mut text = pipeline
        .recognize(Bytes::from(image), &cancel)
        .await
        .with_context(|| format!("Failed to recognize {}", input_path.display()))?;
    if !text.is_empty() {
        text.push('\n');
    }

    match output_path {
        Some(path) => tokio::fs::write(path, &text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(text.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
