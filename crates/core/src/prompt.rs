//! Reasoning prompt templates.
//!
//! Templates carry two placeholders, `{caption}` and `{affected_percentage}`.
//! The percentage is substituted as already-formatted text; templates never
//! do numeric formatting themselves.

use crate::config::ConfigError;
use crate::types::AnalysisType;

pub const CAPTION_PLACEHOLDER: &str = "{caption}";
pub const PERCENTAGE_PLACEHOLDER: &str = "{affected_percentage}";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert agricultural consultant specializing in plant pathology and nutrient management.
Your task is to analyze descriptions of crop plants and provide detailed diagnostic information.
Provide specific, actionable recommendations for farmers based on your observations.
You always respond with a single valid JSON object and no text before or after it.";

const RESPONSE_FORMAT: &str = "Respond with a JSON object using exactly these keys:
\"general_diagnosis\" (string), \"possible_causes\" (array of strings),
\"recommended_treatments\", \"preventative_measures\" and \"specific_recommendations\"
(arrays of objects with \"title\" and \"description\"), and \"additional_notes\" (string or null).";

const DISEASE_FOCUS: &str = "Focus on diseases (bacterial, fungal, viral), pest damage and environmental stress.";
const NUTRIENT_FOCUS: &str = "Focus on nutrient deficiencies (N, P, K, Ca, Mg, S, Fe) and fertilization.";
const BOTH_FOCUS: &str = "Consider diseases, pest damage, environmental stress and nutrient deficiencies.";

/// A validated prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Parse a template, requiring both placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigError> {
        let template = template.into();
        for placeholder in [CAPTION_PLACEHOLDER, PERCENTAGE_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(ConfigError::Invalid {
                    key: "REASONER_PROMPT_TEMPLATE",
                    value: template.clone(),
                    reason: format!("missing {placeholder} placeholder"),
                });
            }
        }
        Ok(Self { template })
    }

    /// Substitute the caption and the pre-formatted percentage.
    pub fn render(&self, caption: &str, affected_percentage: &str) -> String {
        self.template
            .replace(PERCENTAGE_PLACEHOLDER, affected_percentage)
            .replace(CAPTION_PLACEHOLDER, caption)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// One template per [`AnalysisType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    disease: PromptTemplate,
    nutrient: PromptTemplate,
    both: PromptTemplate,
}

impl PromptSet {
    /// Use the same template regardless of analysis type.
    pub fn uniform(template: PromptTemplate) -> Self {
        Self {
            disease: template.clone(),
            nutrient: template.clone(),
            both: template,
        }
    }

    pub fn select(&self, analysis_type: AnalysisType) -> &PromptTemplate {
        match analysis_type {
            AnalysisType::Disease => &self.disease,
            AnalysisType::Nutrient => &self.nutrient,
            AnalysisType::Both => &self.both,
        }
    }

    pub fn render(
        &self,
        analysis_type: AnalysisType,
        caption: &str,
        affected_percentage: &str,
    ) -> String {
        self.select(analysis_type)
            .render(caption, affected_percentage)
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            disease: PromptTemplate {
                template: built_in(DISEASE_FOCUS),
            },
            nutrient: PromptTemplate {
                template: built_in(NUTRIENT_FOCUS),
            },
            both: PromptTemplate {
                template: built_in(BOTH_FOCUS),
            },
        }
    }
}

fn built_in(focus: &str) -> String {
    format!(
        "Image Caption: {CAPTION_PLACEHOLDER}

Affected Area: Approximately {PERCENTAGE_PLACEHOLDER}% of the plant shows signs of stress or damage.

{focus}

Based on this information, please provide:
1. A diagnosis of the most likely issues affecting this plant
2. Potential causes of these symptoms
3. Recommended treatments or interventions
4. Preventative measures for the future

{RESPONSE_FORMAT}"
    )
}
