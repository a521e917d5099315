//! Affected-area policies.
//!
//! The share of a plant flagged as stressed or damaged is a pure function of
//! the plant's masks. Which function is used is a deployment choice, so the
//! orchestrator takes any [`AffectedAreaPolicy`].

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::mask::PlantInstance;

/// Computes the affected percentage of a plant from its masks.
pub trait AffectedAreaPolicy: Send + Sync {
    /// Raw percentage. Callers go through [`affected_percentage`], which clamps.
    fn compute(&self, instance: &PlantInstance) -> f64;

    fn name(&self) -> &'static str;
}

/// Evaluate `policy` and clamp the result to `[0, 100]` (NaN becomes 0).
pub fn affected_percentage(policy: &dyn AffectedAreaPolicy, instance: &PlantInstance) -> f64 {
    clamp_percentage(policy.compute(instance))
}

pub fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Render a percentage the way prompts expect it: one decimal place.
pub fn format_percentage(value: f64) -> String {
    format!("{:.1}", clamp_percentage(value))
}

/// Lesion pixels inside the plant, as a share of the plant's pixels.
///
/// Yields 0 when the model reports no lesion mask.
#[derive(Debug, Default, Clone, Copy)]
pub struct LesionFraction;

impl AffectedAreaPolicy for LesionFraction {
    fn compute(&self, instance: &PlantInstance) -> f64 {
        let Some(lesion) = &instance.lesion_mask else {
            return 0.0;
        };
        let plant_pixels = instance.mask.count();
        if plant_pixels == 0 {
            return 0.0;
        }
        let affected = instance.mask.intersection_count(lesion);
        affected as f64 / plant_pixels as f64 * 100.0
    }

    fn name(&self) -> &'static str {
        "lesion"
    }
}

/// Plant pixels as a share of the whole source image.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskCoverage;

impl AffectedAreaPolicy for MaskCoverage {
    fn compute(&self, instance: &PlantInstance) -> f64 {
        let total = instance.mask.pixel_count();
        if total == 0 {
            return 0.0;
        }
        instance.mask.count() as f64 / total as f64 * 100.0
    }

    fn name(&self) -> &'static str {
        "coverage"
    }
}

/// Configuration-level selector for the built-in policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolicyKind {
    #[default]
    Lesion,
    Coverage,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn AffectedAreaPolicy> {
        match self {
            PolicyKind::Lesion => Box::new(LesionFraction),
            PolicyKind::Coverage => Box::new(MaskCoverage),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Lesion => f.write_str("lesion"),
            PolicyKind::Coverage => f.write_str("coverage"),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lesion" => Ok(PolicyKind::Lesion),
            "coverage" => Ok(PolicyKind::Coverage),
            other => Err(ConfigError::Invalid {
                key: "AFFECTED_AREA_POLICY",
                value: other.to_string(),
                reason: "expected lesion or coverage".to_string(),
            }),
        }
    }
}
