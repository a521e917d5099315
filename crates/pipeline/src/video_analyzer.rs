//! Video Analysis Orchestrator.
//!
//! Pulls sampled frames from a [`FrameExtractor`] and fans them out to a
//! bounded pool of frame workers, each running the [`ImageAnalyzer`]. A frame
//! is only decoded once a worker slot is free, so at most `frame_workers`
//! frames are alive at a time. Results are reassembled in frame order.
//!
//! Failure isolation:
//! - a frame whose segmentation fails contributes zero reports and a
//!   [`FrameFailure`](cropscan_core::report::FrameFailure) entry;
//! - a decode error after at least one frame ends extraction but keeps the
//!   frames already extracted;
//! - an [`AnalysisError::Internal`] from any frame aborts the whole call.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cropscan_core::config::ConfigError;
use cropscan_core::error::AnalysisError;
use cropscan_core::report::{CropReport, VideoAnalysisResult, VideoResultBuilder};
use cropscan_core::types::{validate_frame_interval, AnalysisType, DEFAULT_FRAME_INTERVAL};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::frames::{FfmpegDecoder, FfmpegTools, FrameDecoder, FrameExtractor};
use crate::image_analyzer::ImageAnalyzer;

/// Default number of frames analysed concurrently.
pub const DEFAULT_FRAME_WORKERS: usize = 2;

// ---------------------------------------------------------------------------
// Timeout policy
// ---------------------------------------------------------------------------

/// What happens to frames already being analysed when the deadline passes
/// or the call is cancelled. Frames not yet started are always skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Let in-flight frames finish and keep their reports.
    #[default]
    Finish,
    /// Abort in-flight frames and drop whatever they would have produced.
    Abandon,
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPolicy::Finish => f.write_str("finish"),
            TimeoutPolicy::Abandon => f.write_str("abandon"),
        }
    }
}

impl FromStr for TimeoutPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finish" => Ok(TimeoutPolicy::Finish),
            "abandon" => Ok(TimeoutPolicy::Abandon),
            other => Err(ConfigError::Invalid {
                key: "TIMEOUT_POLICY",
                value: other.to_string(),
                reason: "expected finish or abandon".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Per-call parameters of a video analysis.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub video_filename: String,
    pub frame_interval: u32,
    pub analysis_type: AnalysisType,
    /// Overall budget for the call, measured from its start.
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

impl VideoRequest {
    pub fn new(video_filename: impl Into<String>) -> Self {
        Self {
            video_filename: video_filename.into(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            analysis_type: AnalysisType::default(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: u32) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    TimedOut,
    Cancelled,
}

type FrameOutcome = (u64, Result<Vec<CropReport>, AnalysisError>);

pub struct VideoAnalyzer {
    image: Arc<ImageAnalyzer>,
    frame_workers: usize,
    timeout_policy: TimeoutPolicy,
    tools: FfmpegTools,
}

impl VideoAnalyzer {
    pub fn new(image: Arc<ImageAnalyzer>) -> Self {
        Self {
            image,
            frame_workers: DEFAULT_FRAME_WORKERS,
            timeout_policy: TimeoutPolicy::default(),
            tools: FfmpegTools::default(),
        }
    }

    /// Clamped to at least one.
    pub fn with_frame_workers(mut self, frame_workers: usize) -> Self {
        self.frame_workers = frame_workers.max(1);
        self
    }

    pub fn with_timeout_policy(mut self, timeout_policy: TimeoutPolicy) -> Self {
        self.timeout_policy = timeout_policy;
        self
    }

    pub fn with_ffmpeg_tools(mut self, tools: FfmpegTools) -> Self {
        self.tools = tools;
        self
    }

    /// Analyse a video file on disk.
    pub async fn analyze_video_file(
        &self,
        path: &Path,
        request: VideoRequest,
    ) -> Result<VideoAnalysisResult, AnalysisError> {
        validate_frame_interval(request.frame_interval)?;
        let decoder = FfmpegDecoder::new(path, self.tools.clone());
        self.analyze_video(decoder, request).await
    }

    /// Video entry point for an uploaded byte stream.
    ///
    /// The stream is spooled to a temporary file for `ffmpeg`; the file is
    /// removed when this call returns, whatever the outcome.
    pub async fn analyze_video_stream<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        request: VideoRequest,
    ) -> Result<VideoAnalysisResult, AnalysisError> {
        validate_frame_interval(request.frame_interval)?;

        let suffix = Path::new(&request.video_filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let spool = tempfile::Builder::new()
            .prefix("cropscan-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| AnalysisError::Internal(format!("failed to create spool file: {e}")))?;
        let handle = spool
            .reopen()
            .map_err(|e| AnalysisError::Internal(format!("failed to open spool file: {e}")))?;

        let mut file = tokio::fs::File::from_std(handle);
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| AnalysisError::Decode(format!("failed to read video stream: {e}")))?;
        file.flush()
            .await
            .map_err(|e| AnalysisError::Internal(format!("failed to write spool file: {e}")))?;
        drop(file);

        tracing::debug!(
            bytes = written,
            spool = %spool.path().display(),
            "Video stream spooled",
        );

        self.analyze_video_file(spool.path(), request).await
    }

    pub async fn analyze_video_bytes(
        &self,
        bytes: &[u8],
        request: VideoRequest,
    ) -> Result<VideoAnalysisResult, AnalysisError> {
        self.analyze_video_stream(bytes, request).await
    }

    /// Analyse the frames produced by `decoder`.
    ///
    /// The decoder is owned by this call and dropped on every exit path.
    pub async fn analyze_video<D: FrameDecoder>(
        &self,
        decoder: D,
        request: VideoRequest,
    ) -> Result<VideoAnalysisResult, AnalysisError> {
        let span = tracing::info_span!(
            "video_analysis",
            video = %request.video_filename,
            frame_interval = request.frame_interval,
            analysis_type = %request.analysis_type,
        );
        self.run(decoder, request).instrument(span).await
    }

    async fn run<D: FrameDecoder>(
        &self,
        decoder: D,
        request: VideoRequest,
    ) -> Result<VideoAnalysisResult, AnalysisError> {
        let started = Instant::now();
        let mut extractor = FrameExtractor::new(decoder, request.frame_interval)?;
        let deadline = request
            .deadline
            .map(|budget| tokio::time::Instant::now() + budget);
        let cancel = request.cancel.clone();
        let analysis_type = request.analysis_type;

        let slots = Arc::new(Semaphore::new(self.frame_workers));
        let mut tasks: JoinSet<FrameOutcome> = JoinSet::new();
        let mut outcomes: Vec<FrameOutcome> = Vec::new();
        let mut frames_extracted = 0usize;
        let mut decode_error: Option<AnalysisError> = None;
        let mut interruption: Option<Interruption> = None;

        tracing::info!(frame_workers = self.frame_workers, "Video analysis started");

        // Dispatch: one frame per free worker slot, until the stream ends or
        // the call is interrupted.
        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interruption = Some(Interruption::Cancelled);
                    break;
                }
                _ = wait_until(deadline) => {
                    interruption = Some(Interruption::TimedOut);
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    absorb(joined, &mut outcomes)?;
                    continue;
                }
                permit = Arc::clone(&slots).acquire_owned() => permit
                    .map_err(|_| AnalysisError::Internal("frame worker pool closed".to_string()))?,
            };

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interruption = Some(Interruption::Cancelled);
                    break;
                }
                _ = wait_until(deadline) => {
                    interruption = Some(Interruption::TimedOut);
                    break;
                }
                next = extractor.next() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    frames_extracted += 1;
                    let analyzer = Arc::clone(&self.image);
                    let span = tracing::info_span!(
                        "frame",
                        frame_index = frame.index,
                        timestamp_ms = frame.timestamp.as_millis() as u64,
                    );
                    tasks.spawn(
                        async move {
                            let _slot = permit;
                            let result = analyzer.analyze_frame(&frame, analysis_type).await;
                            (frame.index, result)
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => break,
                Err(e) if frames_extracted == 0 => {
                    tracing::error!(error = %e, "No frame could be extracted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        frames_extracted,
                        error = %e,
                        "Decoding stopped early, keeping extracted frames",
                    );
                    decode_error = Some(e);
                    break;
                }
            }
        }
        drop(extractor);

        if interruption.is_some() && self.timeout_policy == TimeoutPolicy::Abandon {
            tasks.abort_all();
        }

        // Drain in-flight frames. The deadline and cancellation still apply.
        while !tasks.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if interruption.is_none() => {
                    interruption = Some(Interruption::Cancelled);
                    if self.timeout_policy == TimeoutPolicy::Abandon {
                        tasks.abort_all();
                    }
                }
                _ = wait_until(deadline), if interruption.is_none() => {
                    interruption = Some(Interruption::TimedOut);
                    if self.timeout_policy == TimeoutPolicy::Abandon {
                        tasks.abort_all();
                    }
                }
                Some(joined) = tasks.join_next() => absorb(joined, &mut outcomes)?,
                else => break,
            }
        }

        if let Some(kind) = interruption {
            tracing::warn!(
                interruption = ?kind,
                policy = %self.timeout_policy,
                frames_extracted,
                frames_completed = outcomes.len(),
                "Video analysis interrupted",
            );
        }

        outcomes.sort_by_key(|(index, _)| *index);

        let mut builder = VideoResultBuilder::new(
            request.video_filename,
            analysis_type,
            request.frame_interval,
        );
        builder.frames_extracted(frames_extracted);
        for (index, outcome) in outcomes {
            match outcome {
                Ok(reports) => builder.frame_reports(reports),
                Err(e) => builder.frame_failure(index, &e),
            };
        }
        if let Some(e) = &decode_error {
            builder.decode_error(e);
        }
        match interruption {
            Some(Interruption::TimedOut) => {
                builder.timed_out();
            }
            Some(Interruption::Cancelled) => {
                builder.cancelled();
            }
            None => {}
        }

        let result = builder.finish(started.elapsed().as_millis() as u64);
        tracing::info!(
            frames_extracted = result.frames_extracted,
            plants = result.plants_detected,
            failed_frames = result.failed_frames.len(),
            status = ?result.status,
            processing_time_ms = result.processing_time_ms,
            "Video analysis complete",
        );
        Ok(result)
    }
}

/// Fold one finished frame task into `outcomes`.
///
/// Recoverable frame failures are kept as outcomes. Anything else, including
/// a panicked task, aborts the call; returning early drops the [`JoinSet`],
/// which aborts the remaining frames.
fn absorb(
    joined: Result<FrameOutcome, JoinError>,
    outcomes: &mut Vec<FrameOutcome>,
) -> Result<(), AnalysisError> {
    match joined {
        Ok((index, Ok(reports))) => {
            tracing::debug!(frame_index = index, plants = reports.len(), "Frame analysed");
            outcomes.push((index, Ok(reports)));
            Ok(())
        }
        Ok((index, Err(e))) if e.is_recoverable_per_frame() => {
            tracing::warn!(frame_index = index, error = %e, "Frame segmentation failed");
            outcomes.push((index, Err(e)));
            Ok(())
        }
        Ok((index, Err(e))) => {
            tracing::error!(frame_index = index, error = %e, "Frame analysis aborted the video");
            Err(e)
        }
        Err(e) if e.is_cancelled() => {
            tracing::debug!("Abandoned in-flight frame");
            Ok(())
        }
        Err(e) => Err(AnalysisError::Internal(format!("frame task panicked: {e}"))),
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
