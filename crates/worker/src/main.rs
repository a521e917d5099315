//! `cropscan-worker` -- runs the crop-health pipeline on a local file.
//!
//! Model endpoints and pipeline tuning come from the environment (a `.env`
//! file is honoured); see `cropscan_models::config` and
//! `cropscan_pipeline::config` for the variables.
//!
//! | Variable     | Default | Description                                  |
//! |--------------|---------|----------------------------------------------|
//! | `RUST_LOG`   | --      | log filter, overrides the built-in default   |
//! | `LOG_FORMAT` | `text`  | `json` for one JSON object per log line      |
//!
//! The result is printed to stdout; logs go to stderr.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cli::{Args, Command, ImageCommand, VideoCommand};
use cropscan_models::ModelsConfig;
use cropscan_pipeline::{ImageAnalyzer, PipelineConfig, VideoRequest};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "cropscan_worker=info,cropscan_pipeline=info,cropscan_models=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Args = argh::from_env();

    let models = ModelsConfig::from_env().context("invalid model service configuration")?;
    let pipeline = PipelineConfig::from_env().context("invalid pipeline configuration")?;

    let http = reqwest::Client::new();
    let image = Arc::new(pipeline.image_analyzer(models.build(&http), models.retry));

    let output = match args.command {
        Command::Image(cmd) => run_image(&image, cmd).await?,
        Command::Video(cmd) => run_video(&pipeline, image, cmd).await?,
    };
    println!("{output}");
    Ok(())
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run_image(image: &ImageAnalyzer, cmd: ImageCommand) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(&cmd.path)
        .await
        .with_context(|| format!("failed to read {}", cmd.path.display()))?;

    tracing::info!(
        path = %cmd.path.display(),
        bytes = bytes.len(),
        analysis_type = %cmd.analysis_type,
        "Analysing image",
    );

    let result = image
        .analyze_image_bytes(&bytes, file_name(&cmd.path), cmd.analysis_type)
        .await?;
    Ok(serde_json::to_string_pretty(&result)?)
}

async fn run_video(
    pipeline: &PipelineConfig,
    image: Arc<ImageAnalyzer>,
    cmd: VideoCommand,
) -> anyhow::Result<String> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let filename = file_name(&cmd.path).unwrap_or_else(|| cmd.path.display().to_string());
    let request = VideoRequest::new(filename)
        .with_frame_interval(cmd.frame_interval.unwrap_or(pipeline.frame_interval))
        .with_analysis_type(cmd.analysis_type)
        .with_deadline(
            cmd.deadline_secs
                .map(Duration::from_secs)
                .or(pipeline.video_deadline),
        )
        .with_cancel(cancel);

    let video = pipeline.video_analyzer(image);
    let result = video.analyze_video_file(&cmd.path, request).await?;
    Ok(serde_json::to_string_pretty(&result)?)
}

/// Ctrl-C stops dispatching new frames; the partial result is still printed.
fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping video analysis");
            cancel.cancel();
        }
    });
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
