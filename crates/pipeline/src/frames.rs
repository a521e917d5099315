//! Frame extraction.
//!
//! A [`FrameDecoder`] yields every decoded frame of a video in stream order.
//! [`FrameExtractor`] samples every `frame_interval`-th one and tags it with
//! its original index and timestamp. Decoding is pull-driven: a frame is not
//! decoded until the caller asks for it.
//!
//! [`FfmpegDecoder`] is the production decoder. It probes the file with
//! `ffprobe`, then streams raw `rgb24` frames from `ffmpeg` over a pipe.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use cropscan_core::error::AnalysisError;
use cropscan_core::frame::Frame;
use cropscan_core::types::validate_frame_interval;
use image::RgbImage;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Maximum stderr captured from `ffmpeg` (64 KiB).
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Source of decoded frames, in stream order.
pub trait FrameDecoder: Send {
    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    ///
    /// Any error is terminal; the decoder is not read again afterwards.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<RgbImage>, AnalysisError>> + Send;

    /// Frames per second, or `0.0` while unknown.
    fn frame_rate(&self) -> f64;
}

// ---------------------------------------------------------------------------
// Sampling extractor
// ---------------------------------------------------------------------------

/// Lazy, single-pass sequence of sampled [`Frame`]s.
#[derive(Debug)]
pub struct FrameExtractor<D> {
    decoder: D,
    frame_interval: u64,
    next_index: u64,
    finished: bool,
}

impl<D: FrameDecoder> FrameExtractor<D> {
    /// Fails with [`AnalysisError::InvalidParameter`] for a zero interval,
    /// before the decoder is touched.
    pub fn new(decoder: D, frame_interval: u32) -> Result<Self, AnalysisError> {
        let frame_interval = validate_frame_interval(frame_interval)?;
        Ok(Self {
            decoder,
            frame_interval: u64::from(frame_interval),
            next_index: 0,
            finished: false,
        })
    }

    /// The next sampled frame, `Ok(None)` once the stream is exhausted.
    ///
    /// After an error or the end of the stream every further call returns
    /// `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<Frame>, AnalysisError> {
        while !self.finished {
            match self.decoder.next_frame().await {
                Ok(Some(pixels)) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    if index % self.frame_interval == 0 {
                        let timestamp = Frame::timestamp_at(index, self.decoder.frame_rate());
                        return Ok(Some(Frame::new(index, timestamp, pixels)));
                    }
                }
                Ok(None) => self.finished = true,
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Number of frames decoded so far, sampled or not.
    pub fn frames_decoded(&self) -> u64 {
        self.next_index
    }
}

// ---------------------------------------------------------------------------
// ffprobe
// ---------------------------------------------------------------------------

/// Locations of the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Top-level ffprobe JSON output (`-print_format json -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
}

/// Geometry and rate of the first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(tools: &FfmpegTools, path: &Path) -> Result<FfprobeOutput, AnalysisError> {
    if !path.exists() {
        return Err(AnalysisError::Decode(format!(
            "video file not found: {}",
            path.display()
        )));
    }

    let output = Command::new(&tools.ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            AnalysisError::Internal(format!(
                "failed to run {}: {e}",
                tools.ffprobe.display()
            ))
        })?;

    if !output.status.success() {
        return Err(AnalysisError::Decode(format!(
            "ffprobe failed (exit code {:?}): {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    serde_json::from_slice::<FfprobeOutput>(&output.stdout)
        .map_err(|e| AnalysisError::Decode(format!("unreadable ffprobe output: {e}")))
}

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Extract the first video stream's geometry and rate.
pub fn video_info(probe: &FfprobeOutput) -> Result<VideoInfo, AnalysisError> {
    let stream = first_video_stream(probe)
        .ok_or_else(|| AnalysisError::Decode("no video stream found".to_string()))?;

    let (width, height) = (stream.width.unwrap_or(0), stream.height.unwrap_or(0));
    if width == 0 || height == 0 {
        return Err(AnalysisError::Decode(format!(
            "video stream has invalid dimensions {width}x{height}"
        )));
    }

    let frame_rate = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .map(|rate| parse_fraction(rate))
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0);

    Ok(VideoInfo {
        width,
        height,
        frame_rate,
    })
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.trim().parse::<f64>().unwrap_or(0.0);
        let den = den.trim().parse::<f64>().unwrap_or(0.0);
        return if den > 0.0 { num / den } else { 0.0 };
    }
    s.trim().parse::<f64>().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// ffmpeg decoder
// ---------------------------------------------------------------------------

/// Streams every frame of a video file as `rgb24` through `ffmpeg`.
///
/// Nothing is spawned until the first [`FrameDecoder::next_frame`] call. The
/// child process is killed when the decoder is dropped.
pub struct FfmpegDecoder {
    path: PathBuf,
    tools: FfmpegTools,
    state: DecoderState,
}

enum DecoderState {
    Idle,
    Running(RunningDecoder),
    Done,
}

struct RunningDecoder {
    info: VideoInfo,
    // Held so `kill_on_drop` applies for as long as frames are being read.
    child: Child,
    stdout: ChildStdout,
    stderr_task: JoinHandle<Vec<u8>>,
}

impl FfmpegDecoder {
    pub fn new(path: impl Into<PathBuf>, tools: FfmpegTools) -> Self {
        Self {
            path: path.into(),
            tools,
            state: DecoderState::Idle,
        }
    }
}

/// Probe `path`, then start `ffmpeg` streaming its first video stream.
async fn spawn_decoder(path: &Path, tools: &FfmpegTools) -> Result<RunningDecoder, AnalysisError> {
    let probe = probe_video(tools, path).await?;
    let info = video_info(&probe)?;

    tracing::debug!(
        path = %path.display(),
        width = info.width,
        height = info.height,
        frame_rate = info.frame_rate,
        "Starting ffmpeg decoder",
    );

    let mut child = Command::new(&tools.ffmpeg)
        .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            AnalysisError::Internal(format!(
                "failed to run {}: {e}",
                tools.ffmpeg.display()
            ))
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AnalysisError::Internal("ffmpeg stdout not captured".to_string()))?;
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move { read_stream(stderr).await });

    Ok(RunningDecoder {
        info,
        child,
        stdout,
        stderr_task,
    })
}

impl RunningDecoder {
    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    async fn read_frame(&mut self) -> Result<Option<RgbImage>, AnalysisError> {
        let mut buf = vec![0u8; self.frame_len()];
        let filled = read_full(&mut self.stdout, &mut buf)
            .await
            .map_err(|e| AnalysisError::Decode(format!("failed reading ffmpeg output: {e}")))?;

        if filled == 0 {
            return self.finish().await.map(|()| None);
        }
        if filled < buf.len() {
            // A short read means the stream was cut mid-frame; surface the
            // ffmpeg diagnostics if it failed, otherwise report truncation.
            self.finish().await?;
            return Err(AnalysisError::Decode(format!(
                "truncated frame: got {filled} of {} bytes",
                buf.len()
            )));
        }

        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| AnalysisError::Internal("frame buffer size mismatch".to_string()))
    }

    /// Reap the child at end of stream and turn a failed exit into a
    /// decode error.
    async fn finish(&mut self) -> Result<(), AnalysisError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| AnalysisError::Decode(format!("failed waiting for ffmpeg: {e}")))?;
        let stderr = (&mut self.stderr_task).await.unwrap_or_default();

        if !status.success() {
            return Err(AnalysisError::Decode(format!(
                "ffmpeg failed (exit code {:?}): {}",
                status.code(),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(())
    }
}

impl FrameDecoder for FfmpegDecoder {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, AnalysisError> {
        if matches!(self.state, DecoderState::Idle) {
            match spawn_decoder(&self.path, &self.tools).await {
                Ok(running) => self.state = DecoderState::Running(running),
                Err(e) => {
                    self.state = DecoderState::Done;
                    return Err(e);
                }
            }
        }

        let DecoderState::Running(running) = &mut self.state else {
            return Ok(None);
        };
        let result = running.read_frame().await;
        if !matches!(result, Ok(Some(_))) {
            // Dropping the running decoder kills ffmpeg if it is still alive.
            self.state = DecoderState::Done;
        }
        result
    }

    fn frame_rate(&self) -> f64 {
        match &self.state {
            DecoderState::Running(running) => running.info.frame_rate,
            _ => 0.0,
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_STDERR_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
