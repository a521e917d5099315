//! Image Analysis Orchestrator.
//!
//! Segments one image, then runs every plant through
//! caption -> affected area -> reasoning. Per-plant failures become error
//! reports and never stop the remaining plants; only a segmentation failure
//! (or a broken invariant) fails the call.

use std::sync::Arc;

use cropscan_core::affected_area::{
    affected_percentage, format_percentage, AffectedAreaPolicy, LesionFraction,
};
use cropscan_core::diagnosis::parse_diagnosis;
use cropscan_core::error::AnalysisError;
use cropscan_core::frame::Frame;
use cropscan_core::input::{decode_image, DEFAULT_MAX_IMAGE_BYTES};
use cropscan_core::mask::PlantInstance;
use cropscan_core::report::{CropReport, ImageAnalysisResult, PlantRef};
use cropscan_core::types::AnalysisType;
use cropscan_models::{retry_transient, Captioner, ModelClients, Reasoner, RetryPolicy, Segmenter};
use futures::stream::{self, StreamExt};
use image::RgbImage;
use tracing::Instrument;

use crate::segmentation::segment_plants;

/// Default number of plants analysed concurrently within one image.
pub const DEFAULT_PLANT_CONCURRENCY: usize = 4;

/// Drives the three model clients over a single image.
pub struct ImageAnalyzer {
    segmenter: Arc<dyn Segmenter>,
    captioner: Arc<dyn Captioner>,
    reasoner: Arc<dyn Reasoner>,
    policy: Arc<dyn AffectedAreaPolicy>,
    retry: RetryPolicy,
    plant_concurrency: usize,
    max_image_bytes: usize,
}

impl ImageAnalyzer {
    pub fn new(
        segmenter: Arc<dyn Segmenter>,
        captioner: Arc<dyn Captioner>,
        reasoner: Arc<dyn Reasoner>,
    ) -> Self {
        Self {
            segmenter,
            captioner,
            reasoner,
            policy: Arc::new(LesionFraction),
            retry: RetryPolicy::default(),
            plant_concurrency: DEFAULT_PLANT_CONCURRENCY,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn from_clients(clients: ModelClients) -> Self {
        Self::new(clients.segmenter, clients.captioner, clients.reasoner)
    }

    pub fn with_policy(mut self, policy: Arc<dyn AffectedAreaPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Clamped to at least one.
    pub fn with_plant_concurrency(mut self, plant_concurrency: usize) -> Self {
        self.plant_concurrency = plant_concurrency.max(1);
        self
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Analyse a decoded still image. Reports come back in instance order.
    pub async fn analyze_image(
        &self,
        image: &RgbImage,
        analysis_type: AnalysisType,
    ) -> Result<Vec<CropReport>, AnalysisError> {
        self.analyze(image, None, analysis_type).await
    }

    /// Analyse one sampled video frame; reports carry the frame index.
    pub async fn analyze_frame(
        &self,
        frame: &Frame,
        analysis_type: AnalysisType,
    ) -> Result<Vec<CropReport>, AnalysisError> {
        self.analyze(&frame.pixels, Some(frame.index), analysis_type)
            .await
    }

    /// Image entry point: validate and decode raw bytes, analyse, and wrap
    /// the reports with an overall status.
    pub async fn analyze_image_bytes(
        &self,
        bytes: &[u8],
        image_filename: Option<String>,
        analysis_type: AnalysisType,
    ) -> Result<ImageAnalysisResult, AnalysisError> {
        let image = decode_image(bytes, self.max_image_bytes)?;
        let reports = self.analyze_image(&image, analysis_type).await?;
        let result = ImageAnalysisResult::from_reports(image_filename, analysis_type, reports);

        tracing::info!(
            filename = result.image_filename.as_deref().unwrap_or("-"),
            plants = result.plants_detected,
            status = ?result.status,
            "Image analysis complete",
        );
        Ok(result)
    }

    async fn analyze(
        &self,
        image: &RgbImage,
        frame_index: Option<u64>,
        analysis_type: AnalysisType,
    ) -> Result<Vec<CropReport>, AnalysisError> {
        let instances =
            segment_plants(self.segmenter.as_ref(), &self.retry, image, frame_index).await?;

        // `buffered` keeps instance order regardless of completion order.
        let plant_futures: Vec<_> = instances
            .iter()
            .enumerate()
            .map(|(plant_index, instance)| {
                let span = tracing::debug_span!("plant", frame_index, plant_index);
                self.analyze_plant(plant_index, instance, analysis_type)
                    .instrument(span)
            })
            .collect();
        let reports: Vec<CropReport> = stream::iter(plant_futures)
            .buffered(self.plant_concurrency)
            .collect()
            .await;

        let failed = reports.iter().filter(|r| !r.is_success()).count();
        tracing::debug!(
            frame_index,
            plants = reports.len(),
            failed,
            "Plant analysis finished",
        );
        Ok(reports)
    }

    /// Analyse one plant. Never fails: a failing client call yields an error
    /// report carrying the affected area measured beforehand.
    async fn analyze_plant(
        &self,
        plant_index: usize,
        instance: &PlantInstance,
        analysis_type: AnalysisType,
    ) -> CropReport {
        let pct = affected_percentage(self.policy.as_ref(), instance);
        let plant = PlantRef {
            frame_index: instance.source_frame_index,
            plant_index,
            bounding_box: instance.bounding_box,
            affected_percentage: pct,
            score: instance.score,
            has_disease: instance.has_disease,
        };

        let caption = match retry_transient(&self.retry, || self.captioner.caption(&instance.crop))
            .await
        {
            Ok(caption) => caption,
            Err(e) => {
                tracing::warn!(plant_index, error = %e, "Captioning failed");
                return CropReport::failure(plant, &e.into());
            }
        };

        let pct_text = format_percentage(pct);
        let diagnosis = match retry_transient(&self.retry, || {
            self.reasoner.reason(&caption, &pct_text, analysis_type)
        })
        .await
        {
            Ok(diagnosis) => diagnosis,
            Err(e) => {
                tracing::warn!(plant_index, error = %e, "Reasoning failed");
                return CropReport::failure(plant, &e.into());
            }
        };

        let structured = parse_diagnosis(&diagnosis);
        CropReport::success(plant, caption, diagnosis, structured)
    }
}
