//! Crop reports and the aggregate image/video results built from them.
//!
//! Every plant instance yields exactly one [`CropReport`]. Success reports
//! carry a caption and a diagnosis; error reports carry an error message and
//! nothing else, which the constructors enforce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::affected_area::clamp_percentage;
use crate::diagnosis::StructuredDiagnosis;
use crate::error::AnalysisError;
use crate::types::{AnalysisStatus, AnalysisType, BoundingBox, ReportStatus};

// ---------------------------------------------------------------------------
// Crop report
// ---------------------------------------------------------------------------

/// Where a report's plant came from and what was measured before any
/// outbound call was made.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantRef {
    pub frame_index: Option<u64>,
    pub plant_index: usize,
    pub bounding_box: BoundingBox,
    pub affected_percentage: f64,
    /// Segmentation confidence and disease flag, as the service reported them.
    pub score: Option<f32>,
    pub has_disease: Option<bool>,
}

/// Diagnosis (or failure record) for one plant instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropReport {
    /// Volatile identifier, unique per report.
    pub plant_image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
    pub plant_index: usize,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_diagnosis: Option<StructuredDiagnosis>,
    pub affected_percentage: f64,
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_disease: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CropReport {
    pub fn success(
        plant: PlantRef,
        caption: String,
        diagnosis: String,
        structured_diagnosis: Option<StructuredDiagnosis>,
    ) -> Self {
        Self {
            plant_image_id: new_plant_image_id(),
            frame_index: plant.frame_index,
            plant_index: plant.plant_index,
            status: ReportStatus::Success,
            caption: Some(caption),
            diagnosis: Some(diagnosis),
            structured_diagnosis,
            affected_percentage: clamp_percentage(plant.affected_percentage),
            bounding_box: plant.bounding_box,
            score: plant.score,
            has_disease: plant.has_disease,
            error_message: None,
        }
    }

    pub fn failure(plant: PlantRef, error: &AnalysisError) -> Self {
        Self {
            plant_image_id: new_plant_image_id(),
            frame_index: plant.frame_index,
            plant_index: plant.plant_index,
            status: ReportStatus::Error,
            caption: None,
            diagnosis: None,
            structured_diagnosis: None,
            affected_percentage: clamp_percentage(plant.affected_percentage),
            bounding_box: plant.bounding_box,
            score: plant.score,
            has_disease: plant.has_disease,
            error_message: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }

    /// Whether the status/field pairing holds.
    pub fn is_consistent(&self) -> bool {
        let in_range = (0.0..=100.0).contains(&self.affected_percentage);
        let fields_match = match self.status {
            ReportStatus::Success => {
                self.caption.is_some() && self.diagnosis.is_some() && self.error_message.is_none()
            }
            ReportStatus::Error => {
                self.caption.is_none() && self.diagnosis.is_none() && self.error_message.is_some()
            }
        };
        in_range && fields_match
    }
}

fn new_plant_image_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Status tally
// ---------------------------------------------------------------------------

/// Counts of succeeded and failed units of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTally {
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusTally {
    pub fn success(&mut self) {
        self.succeeded += 1;
    }

    pub fn failure(&mut self) {
        self.failed += 1;
    }

    /// Count a successfully segmented source and its reports.
    ///
    /// A source with no detections is itself one successful unit.
    pub fn record_reports(&mut self, reports: &[CropReport]) {
        if reports.is_empty() {
            self.success();
            return;
        }
        for report in reports {
            if report.is_success() {
                self.success();
            } else {
                self.failure();
            }
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        match (self.succeeded, self.failed) {
            (0, _) => AnalysisStatus::Error,
            (_, 0) => AnalysisStatus::Success,
            _ => AnalysisStatus::Partial,
        }
    }
}

// ---------------------------------------------------------------------------
// Image result
// ---------------------------------------------------------------------------

/// Result of analysing one still image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
    pub analysis_type: AnalysisType,
    pub plants_detected: usize,
    pub analysis_results: Vec<CropReport>,
    pub status: AnalysisStatus,
}

impl ImageAnalysisResult {
    pub fn from_reports(
        image_filename: Option<String>,
        analysis_type: AnalysisType,
        reports: Vec<CropReport>,
    ) -> Self {
        let mut tally = StatusTally::default();
        tally.record_reports(&reports);
        Self {
            image_filename,
            analysis_type,
            plants_detected: reports.len(),
            analysis_results: reports,
            status: tally.status(),
        }
    }
}

// ---------------------------------------------------------------------------
// Video result
// ---------------------------------------------------------------------------

/// A sampled frame whose segmentation failed; it contributed no reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFailure {
    pub frame_index: u64,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysisResult {
    pub video_filename: String,
    pub analysis_type: AnalysisType,
    pub frame_interval: u32,
    pub frames_extracted: usize,
    pub plants_detected: usize,
    pub analysis_results: Vec<CropReport>,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_frames: Vec<FrameFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub processing_time_ms: u64,
    pub analyzed_at: DateTime<Utc>,
}

/// Accumulates per-frame outcomes, in frame order, into a
/// [`VideoAnalysisResult`].
#[derive(Debug)]
pub struct VideoResultBuilder {
    video_filename: String,
    analysis_type: AnalysisType,
    frame_interval: u32,
    frames_extracted: usize,
    reports: Vec<CropReport>,
    failed_frames: Vec<FrameFailure>,
    decode_error: Option<String>,
    timed_out: bool,
    cancelled: bool,
    tally: StatusTally,
}

impl VideoResultBuilder {
    pub fn new(
        video_filename: impl Into<String>,
        analysis_type: AnalysisType,
        frame_interval: u32,
    ) -> Self {
        Self {
            video_filename: video_filename.into(),
            analysis_type,
            frame_interval,
            frames_extracted: 0,
            reports: Vec::new(),
            failed_frames: Vec::new(),
            decode_error: None,
            timed_out: false,
            cancelled: false,
            tally: StatusTally::default(),
        }
    }

    pub fn frames_extracted(&mut self, count: usize) -> &mut Self {
        self.frames_extracted = count;
        self
    }

    pub fn frame_reports(&mut self, reports: Vec<CropReport>) -> &mut Self {
        self.tally.record_reports(&reports);
        self.reports.extend(reports);
        self
    }

    pub fn frame_failure(&mut self, frame_index: u64, error: &AnalysisError) -> &mut Self {
        self.tally.failure();
        self.failed_frames.push(FrameFailure {
            frame_index,
            code: error.code().to_string(),
            message: error.to_string(),
        });
        self
    }

    pub fn decode_error(&mut self, error: &AnalysisError) -> &mut Self {
        self.tally.failure();
        self.decode_error = Some(error.to_string());
        self
    }

    pub fn timed_out(&mut self) -> &mut Self {
        if !self.timed_out && !self.cancelled {
            self.tally.failure();
        }
        self.timed_out = true;
        self
    }

    pub fn cancelled(&mut self) -> &mut Self {
        if !self.timed_out && !self.cancelled {
            self.tally.failure();
        }
        self.cancelled = true;
        self
    }

    pub fn finish(self, processing_time_ms: u64) -> VideoAnalysisResult {
        let status = if self.frames_extracted == 0 {
            AnalysisStatus::Error
        } else {
            self.tally.status()
        };

        VideoAnalysisResult {
            video_filename: self.video_filename,
            analysis_type: self.analysis_type,
            frame_interval: self.frame_interval,
            frames_extracted: self.frames_extracted,
            plants_detected: self.reports.len(),
            analysis_results: self.reports,
            status,
            failed_frames: self.failed_frames,
            decode_error: self.decode_error,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            processing_time_ms,
            analyzed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Service;

    fn plant(index: usize, pct: f64) -> PlantRef {
        PlantRef {
            frame_index: Some(0),
            plant_index: index,
            bounding_box: BoundingBox::new(0, 0, 1, 1),
            affected_percentage: pct,
            score: None,
            has_disease: None,
        }
    }

    fn ok(index: usize) -> CropReport {
        CropReport::success(plant(index, 5.0), "caption".into(), "diagnosis".into(), None)
    }

    fn failed(index: usize) -> CropReport {
        let err = AnalysisError::UpstreamUnavailable {
            service: Service::Captioning,
            message: "timeout".into(),
        };
        CropReport::failure(plant(index, 5.0), &err)
    }

    #[test]
    fn success_and_failure_reports_are_consistent() {
        assert!(ok(0).is_consistent());
        let f = failed(1);
        assert!(f.is_consistent());
        assert!(f.caption.is_none());
        assert!(f.error_message.as_deref().unwrap().contains("captioning"));
    }

    #[test]
    fn segmentation_metadata_is_reported_when_known() {
        let mut meta = plant(0, 5.0);
        meta.score = Some(0.75);
        meta.has_disease = Some(true);

        let json = serde_json::to_value(CropReport::failure(
            meta,
            &AnalysisError::Internal("boom".into()),
        ))
        .unwrap();
        assert_eq!(json["score"], 0.75);
        assert_eq!(json["has_disease"], true);

        let json = serde_json::to_value(ok(1)).unwrap();
        assert!(json.get("score").is_none());
        assert!(json.get("has_disease").is_none());
    }

    #[test]
    fn report_percentage_is_clamped() {
        let r = CropReport::success(plant(0, 180.0), "c".into(), "d".into(), None);
        assert_eq!(r.affected_percentage, 100.0);
    }

    #[test]
    fn report_ids_are_unique() {
        assert_ne!(ok(0).plant_image_id, ok(0).plant_image_id);
    }

    #[test]
    fn error_report_serializes_without_caption() {
        let json = serde_json::to_value(failed(0)).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("caption").is_none());
        assert!(json.get("error_message").is_some());
    }

    #[test]
    fn image_status_rules() {
        let empty = ImageAnalysisResult::from_reports(None, AnalysisType::Both, vec![]);
        assert_eq!(empty.status, AnalysisStatus::Success);
        assert_eq!(empty.plants_detected, 0);

        let mixed = ImageAnalysisResult::from_reports(None, AnalysisType::Both, vec![ok(0), failed(1)]);
        assert_eq!(mixed.status, AnalysisStatus::Partial);
        assert_eq!(mixed.plants_detected, 2);

        let all_failed = ImageAnalysisResult::from_reports(None, AnalysisType::Both, vec![failed(0)]);
        assert_eq!(all_failed.status, AnalysisStatus::Error);
    }

    #[test]
    fn video_with_no_frames_is_error() {
        let result = VideoResultBuilder::new("v.mp4", AnalysisType::Disease, 30).finish(0);
        assert_eq!(result.status, AnalysisStatus::Error);
        assert_eq!(result.plants_detected, 0);
    }

    #[test]
    fn video_zero_detections_is_success() {
        let mut b = VideoResultBuilder::new("v.mp4", AnalysisType::Disease, 30);
        b.frames_extracted(3);
        for _ in 0..3 {
            b.frame_reports(vec![]);
        }
        let result = b.finish(10);
        assert_eq!(result.status, AnalysisStatus::Success);
        assert!(result.analysis_results.is_empty());
    }

    #[test]
    fn video_decode_error_downgrades_to_partial() {
        let mut b = VideoResultBuilder::new("v.mp4", AnalysisType::Both, 30);
        b.frames_extracted(1)
            .frame_reports(vec![ok(0)])
            .decode_error(&AnalysisError::Decode("truncated".into()));
        let result = b.finish(1);
        assert_eq!(result.status, AnalysisStatus::Partial);
        assert!(result.decode_error.is_some());
    }

    #[test]
    fn video_timeout_never_reports_success() {
        let mut b = VideoResultBuilder::new("v.mp4", AnalysisType::Both, 30);
        b.frames_extracted(1).frame_reports(vec![ok(0)]).timed_out().timed_out();
        let result = b.finish(1);
        assert_eq!(result.status, AnalysisStatus::Partial);
        assert!(result.timed_out);
    }

    #[test]
    fn video_all_frames_failed_is_error() {
        let err = AnalysisError::Upstream {
            service: Service::Segmentation,
            message: "HTTP 500".into(),
        };
        let mut b = VideoResultBuilder::new("v.mp4", AnalysisType::Both, 30);
        b.frames_extracted(2).frame_failure(0, &err).frame_failure(30, &err);
        let result = b.finish(1);
        assert_eq!(result.status, AnalysisStatus::Error);
        assert_eq!(result.failed_frames.len(), 2);
        assert_eq!(result.failed_frames[1].code, "upstream_error");
    }
}
