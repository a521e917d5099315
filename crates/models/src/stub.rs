//! Lightweight in-process model implementations.
//!
//! Colour heuristics and keyword rules stand in for the real services so the
//! pipeline can run without any model server. Output is deterministic for
//! identical input.

use async_trait::async_trait;
use cropscan_core::diagnosis::{RecommendationItem, StructuredDiagnosis};
use cropscan_core::error::Service;
use cropscan_core::mask::{BinaryMask, Detection};
use cropscan_core::types::AnalysisType;
use image::{Rgb, RgbImage};

use crate::captioner::Captioner;
use crate::error::ModelError;
use crate::reasoner::Reasoner;
use crate::segmenter::Segmenter;

fn is_green(&Rgb([r, g, b]): &Rgb<u8>) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    g >= 50 && g > r + 15 && g > b + 15
}

/// Yellow or brown tissue.
fn is_damaged(&Rgb([r, g, b]): &Rgb<u8>) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    r >= 80 && r + 20 >= g && g >= b + 20
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Treats every green, yellow or brown pixel as one plant.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubSegmenter;

#[async_trait]
impl Segmenter for StubSegmenter {
    async fn segment(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let (width, height) = image.dimensions();
        let plant = BinaryMask::from_fn(width, height, |x, y| {
            let p = image.get_pixel(x, y);
            is_green(p) || is_damaged(p)
        });
        if plant.is_empty() {
            return Ok(Vec::new());
        }

        let lesion = BinaryMask::from_fn(width, height, |x, y| is_damaged(image.get_pixel(x, y)));
        let mut detection = Detection::new(plant)
            .with_score(1.0)
            .with_has_disease(!lesion.is_empty());
        if !lesion.is_empty() {
            detection = detection.with_lesion_mask(lesion);
        }
        Ok(vec![detection])
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

// ---------------------------------------------------------------------------
// Captioner
// ---------------------------------------------------------------------------

/// Captions a crop from the share of green and damaged pixels in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubCaptioner;

#[async_trait]
impl Captioner for StubCaptioner {
    async fn caption(&self, crop: &RgbImage) -> Result<String, ModelError> {
        let mut visible = 0u64;
        let mut green = 0u64;
        let mut damaged = 0u64;
        for p in crop.pixels() {
            if p.0 == [0, 0, 0] {
                continue;
            }
            visible += 1;
            if is_green(p) {
                green += 1;
            } else if is_damaged(p) {
                damaged += 1;
            }
        }

        if visible == 0 {
            return Err(ModelError::rejected(
                Service::Captioning,
                "crop has no visible pixels",
            ));
        }

        let damaged_share = damaged as f64 / visible as f64;
        let green_share = green as f64 / visible as f64;
        let caption = if damaged_share > 0.3 {
            "A plant with extensive brown spots and lesions on its leaves"
        } else if damaged_share > 0.1 {
            "A plant with yellowing leaves and a few small spots"
        } else if green_share > 0.5 {
            "A healthy green plant with lush foliage"
        } else {
            "A plant with pale, drooping leaves"
        };
        Ok(caption.to_string())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

// ---------------------------------------------------------------------------
// Reasoner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finding {
    NitrogenDeficiency,
    FungalInfection,
    WaterStress,
}

impl Finding {
    fn from_caption(caption: &str) -> Vec<Finding> {
        let caption = caption.to_lowercase();
        let mut findings = Vec::new();
        if mentions(&caption, &["yellow", "chlorosis"]) {
            findings.push(Finding::NitrogenDeficiency);
        }
        if mentions(&caption, &["spot", "lesion"]) {
            findings.push(Finding::FungalInfection);
        }
        if mentions(&caption, &["wilt", "droop"]) {
            findings.push(Finding::WaterStress);
        }
        findings
    }

    fn relevant_to(self, analysis_type: AnalysisType) -> bool {
        match (self, analysis_type) {
            (_, AnalysisType::Both) => true,
            (Finding::NitrogenDeficiency, t) => t == AnalysisType::Nutrient,
            (_, t) => t == AnalysisType::Disease,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Finding::NitrogenDeficiency => "nitrogen deficiency",
            Finding::FungalInfection => "fungal infection",
            Finding::WaterStress => "water stress",
        }
    }

    fn cause(self) -> &'static str {
        match self {
            Finding::NitrogenDeficiency => "Insufficient available nitrogen in the root zone",
            Finding::FungalInfection => "Fungal pathogens favoured by leaf wetness and humidity",
            Finding::WaterStress => "Irregular irrigation or high evaporative demand",
        }
    }

    fn treatment(self) -> RecommendationItem {
        let (title, description) = match self {
            Finding::NitrogenDeficiency => (
                "Nitrogen fertilization",
                "Apply a nitrogen-rich fertilizer and re-check leaf colour in 7 to 10 days.",
            ),
            Finding::FungalInfection => (
                "Fungicide application",
                "Remove affected leaves and apply a broad-spectrum fungicide.",
            ),
            Finding::WaterStress => (
                "Irrigation adjustment",
                "Water deeply at the base early in the day and mulch to retain moisture.",
            ),
        };
        RecommendationItem {
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn severity(pct: f64) -> &'static str {
    if pct < 10.0 {
        "Mild"
    } else if pct < 30.0 {
        "Moderate"
    } else {
        "Severe"
    }
}

/// Rule-based diagnosis from caption keywords and severity bands.
///
/// Replies with the same JSON shape the real reasoner is prompted for.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubReasoner;

#[async_trait]
impl Reasoner for StubReasoner {
    async fn reason(
        &self,
        caption: &str,
        affected_percentage: &str,
        analysis_type: AnalysisType,
    ) -> Result<String, ModelError> {
        let pct: f64 = affected_percentage.trim().parse().map_err(|_| {
            ModelError::rejected(
                Service::Reasoning,
                format!("affected percentage {affected_percentage:?} is not a number"),
            )
        })?;

        let findings: Vec<Finding> = Finding::from_caption(caption)
            .into_iter()
            .filter(|f| f.relevant_to(analysis_type))
            .collect();

        let summary = if findings.is_empty() {
            "general plant stress".to_string()
        } else {
            findings
                .iter()
                .map(|f| f.label())
                .collect::<Vec<_>>()
                .join(" and ")
        };

        let diagnosis = StructuredDiagnosis {
            general_diagnosis: format!(
                "{} {summary} ({affected_percentage}% of the plant affected)",
                severity(pct)
            ),
            possible_causes: if findings.is_empty() {
                vec!["Unfavourable growing conditions".to_string()]
            } else {
                findings.iter().map(|f| f.cause().to_string()).collect()
            },
            recommended_treatments: findings.iter().map(|f| f.treatment()).collect(),
            preventative_measures: vec![RecommendationItem {
                title: "Regular scouting".to_string(),
                description: "Inspect plants weekly so changes are caught early.".to_string(),
            }],
            specific_recommendations: Vec::new(),
            additional_notes: Some(format!("Observation: {caption}")),
        };

        serde_json::to_string(&diagnosis)
            .map_err(|e| ModelError::rejected(Service::Reasoning, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
