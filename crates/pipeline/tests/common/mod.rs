//! Scripted model clients and a synthetic frame decoder.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cropscan_core::error::{AnalysisError, Service};
use cropscan_core::mask::{BinaryMask, Detection};
use cropscan_core::types::AnalysisType;
use cropscan_models::{Captioner, ModelError, Reasoner, RetryPolicy, Segmenter};
use cropscan_pipeline::{FrameDecoder, ImageAnalyzer};
use image::{Rgb, RgbImage};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 8;

pub const DIAGNOSIS_JSON: &str = r#"{
    "general_diagnosis": "Early nitrogen deficiency",
    "possible_causes": ["Leached soil"],
    "recommended_treatments": [{"title": "Side-dress", "description": "Apply nitrogen"}]
}"#;

/// Solid test image; `tag` lands in the red channel so scripted clients can
/// tell frames apart.
pub fn tagged_image(tag: u8) -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([tag, 160, 40]))
}

/// Two plants side by side. The left one (higher score, flagged diseased)
/// has its first column marked as lesion, i.e. 25% affected.
pub fn two_plants() -> Vec<Detection> {
    let left = Detection::new(BinaryMask::from_fn(WIDTH, HEIGHT, |x, _| x < 4))
        .with_lesion_mask(BinaryMask::from_fn(WIDTH, HEIGHT, |x, _| x == 0))
        .with_score(0.9)
        .with_has_disease(true);
    let right = Detection::new(BinaryMask::from_fn(WIDTH, HEIGHT, |x, _| x >= 4)).with_score(0.8);
    vec![right, left]
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        multiplier: 2.0,
    }
}

pub fn unavailable(service: Service) -> ModelError {
    ModelError::unavailable(service, "connection refused")
}

pub fn rejected(service: Service) -> ModelError {
    ModelError::rejected(service, "HTTP 422: bad input")
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedSegmenter {
    detections: Vec<Detection>,
    failures: Mutex<VecDeque<ModelError>>,
    failing_tags: Vec<u8>,
    delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedSegmenter {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            ..Default::default()
        }
    }

    /// Fail the next calls, in order, before answering normally.
    pub fn failing_first(self, failures: Vec<ModelError>) -> Self {
        *self.failures.lock().unwrap() = failures.into();
        self
    }

    /// Reject every image whose tag is in `tags`.
    pub fn failing_tags(mut self, tags: Vec<u8>) -> Self {
        self.failing_tags = tags;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Segmenter for ScriptedSegmenter {
    async fn segment(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let tag = image.get_pixel(0, 0)[0];
        if self.failing_tags.contains(&tag) {
            return Err(rejected(Service::Segmentation));
        }
        Ok(self.detections.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Captioner
// ---------------------------------------------------------------------------

pub struct ScriptedCaptioner {
    caption: String,
    failures: Mutex<VecDeque<ModelError>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedCaptioner {
    pub fn new(caption: &str) -> Self {
        Self {
            caption: caption.to_string(),
            failures: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(self, failures: Vec<ModelError>) -> Self {
        *self.failures.lock().unwrap() = failures.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Captioner for ScriptedCaptioner {
    async fn caption(&self, _crop: &RgbImage) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.caption.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Reasoner
// ---------------------------------------------------------------------------

pub struct ScriptedReasoner {
    response: String,
    failures: Mutex<VecDeque<ModelError>>,
    /// `(caption, affected_percentage, analysis_type)` per call.
    pub seen: Mutex<Vec<(String, String, AnalysisType)>>,
}

impl ScriptedReasoner {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            failures: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(self, failures: Vec<ModelError>) -> Self {
        *self.failures.lock().unwrap() = failures.into();
        self
    }

    pub fn seen(&self) -> Vec<(String, String, AnalysisType)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(
        &self,
        caption: &str,
        affected_percentage: &str,
        analysis_type: AnalysisType,
    ) -> Result<String, ModelError> {
        self.seen.lock().unwrap().push((
            caption.to_string(),
            affected_percentage.to_string(),
            analysis_type,
        ));
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.response.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

pub struct Clients {
    pub segmenter: Arc<ScriptedSegmenter>,
    pub captioner: Arc<ScriptedCaptioner>,
    pub reasoner: Arc<ScriptedReasoner>,
}

impl Clients {
    pub fn new(
        segmenter: ScriptedSegmenter,
        captioner: ScriptedCaptioner,
        reasoner: ScriptedReasoner,
    ) -> Self {
        Self {
            segmenter: Arc::new(segmenter),
            captioner: Arc::new(captioner),
            reasoner: Arc::new(reasoner),
        }
    }

    /// Two plants per image, every call succeeds.
    pub fn healthy() -> Self {
        Self::new(
            ScriptedSegmenter::new(two_plants()),
            ScriptedCaptioner::new("a maize leaf with yellow streaks"),
            ScriptedReasoner::new(DIAGNOSIS_JSON),
        )
    }

    pub fn analyzer(&self) -> ImageAnalyzer {
        ImageAnalyzer::new(
            self.segmenter.clone(),
            self.captioner.clone(),
            self.reasoner.clone(),
        )
        .with_retry(fast_retry())
    }
}

// ---------------------------------------------------------------------------
// Frame decoder
// ---------------------------------------------------------------------------

/// Emits `total` tagged frames, optionally failing once `fail_at` frames have
/// been decoded.
pub struct SyntheticDecoder {
    total: u64,
    fail_at: Option<u64>,
    decoded: u64,
    pulls: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
}

impl SyntheticDecoder {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            fail_at: None,
            decoded: 0,
            pulls: Arc::new(AtomicU64::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_at(mut self, decoded: u64) -> Self {
        self.fail_at = Some(decoded);
        self
    }

    /// Shared count of `next_frame` calls, readable after the decoder moves.
    pub fn pulls(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.pulls)
    }

    /// Set once the decoder has been dropped.
    pub fn released(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl FrameDecoder for SyntheticDecoder {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, AnalysisError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(self.decoded) {
            return Err(AnalysisError::Decode("corrupt packet".to_string()));
        }
        if self.decoded == self.total {
            return Ok(None);
        }
        let tag = (self.decoded % 256) as u8;
        self.decoded += 1;
        Ok(Some(tagged_image(tag)))
    }

    fn frame_rate(&self) -> f64 {
        30.0
    }
}
