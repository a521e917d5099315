//! Pipeline configuration loaded from environment variables.
//!
//! | Variable               | Default     | Meaning                                  |
//! |------------------------|-------------|------------------------------------------|
//! | `FRAME_INTERVAL`       | `30`        | default sampling interval                |
//! | `FRAME_WORKERS`        | `2`         | frames analysed concurrently             |
//! | `PLANT_WORKERS`        | `4`         | plants analysed concurrently per frame   |
//! | `VIDEO_DEADLINE_SECS`  | unset       | overall budget for a video call          |
//! | `TIMEOUT_POLICY`       | `finish`    | `finish` or `abandon` in-flight frames   |
//! | `AFFECTED_AREA_POLICY` | `lesion`    | `lesion` or `coverage`                   |
//! | `MAX_IMAGE_BYTES`      | `10485760`  | image upload limit                       |
//! | `FFMPEG_PATH`          | `ffmpeg`    | decoder binary                           |
//! | `FFPROBE_PATH`         | `ffprobe`   | probe binary                             |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cropscan_core::affected_area::PolicyKind;
use cropscan_core::config::{env_or, env_parse, env_parse_opt, ConfigError};
use cropscan_core::input::DEFAULT_MAX_IMAGE_BYTES;
use cropscan_core::types::DEFAULT_FRAME_INTERVAL;
use cropscan_models::{ModelClients, RetryPolicy};

use crate::frames::FfmpegTools;
use crate::image_analyzer::{ImageAnalyzer, DEFAULT_PLANT_CONCURRENCY};
use crate::video_analyzer::{TimeoutPolicy, VideoAnalyzer, DEFAULT_FRAME_WORKERS};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub frame_interval: u32,
    pub frame_workers: usize,
    pub plant_workers: usize,
    pub video_deadline: Option<Duration>,
    pub timeout_policy: TimeoutPolicy,
    pub affected_area: PolicyKind,
    pub max_image_bytes: usize,
    pub ffmpeg: FfmpegTools,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            frame_workers: DEFAULT_FRAME_WORKERS,
            plant_workers: DEFAULT_PLANT_CONCURRENCY,
            video_deadline: None,
            timeout_policy: TimeoutPolicy::default(),
            affected_area: PolicyKind::default(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            ffmpeg: FfmpegTools::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            frame_interval: env_parse("FRAME_INTERVAL", DEFAULT_FRAME_INTERVAL)?,
            frame_workers: env_parse("FRAME_WORKERS", DEFAULT_FRAME_WORKERS)?,
            plant_workers: env_parse("PLANT_WORKERS", DEFAULT_PLANT_CONCURRENCY)?,
            video_deadline: env_parse_opt::<u64>("VIDEO_DEADLINE_SECS")?.map(Duration::from_secs),
            timeout_policy: env_parse("TIMEOUT_POLICY", TimeoutPolicy::default())?,
            affected_area: env_parse("AFFECTED_AREA_POLICY", PolicyKind::default())?,
            max_image_bytes: env_parse("MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
            ffmpeg: FfmpegTools {
                ffmpeg: PathBuf::from(env_or("FFMPEG_PATH", "ffmpeg")),
                ffprobe: PathBuf::from(env_or("FFPROBE_PATH", "ffprobe")),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("FRAME_INTERVAL", self.frame_interval as usize),
            ("FRAME_WORKERS", self.frame_workers),
            ("PLANT_WORKERS", self.plant_workers),
            ("MAX_IMAGE_BYTES", self.max_image_bytes),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Construct the image orchestrator around the given clients.
    pub fn image_analyzer(&self, clients: ModelClients, retry: RetryPolicy) -> ImageAnalyzer {
        ImageAnalyzer::from_clients(clients)
            .with_policy(Arc::from(self.affected_area.build()))
            .with_retry(retry)
            .with_plant_concurrency(self.plant_workers)
            .with_max_image_bytes(self.max_image_bytes)
    }

    /// Construct the video orchestrator on top of an image orchestrator.
    pub fn video_analyzer(&self, image: Arc<ImageAnalyzer>) -> VideoAnalyzer {
        VideoAnalyzer::new(image)
            .with_frame_workers(self.frame_workers)
            .with_timeout_policy(self.timeout_policy)
            .with_ffmpeg_tools(self.ffmpeg.clone())
    }
}
