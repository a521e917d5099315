//! Structured diagnosis parsed from reasoning-service output.
//!
//! The reasoning model is asked for a JSON object; models frequently wrap it
//! in Markdown fences or ignore the instruction altogether. Parsing is
//! therefore best-effort: the raw text is always kept on the report, and the
//! structured form is attached only when it parses.

use serde::{Deserialize, Serialize};

/// A titled recommendation or measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredDiagnosis {
    pub general_diagnosis: String,
    #[serde(default)]
    pub possible_causes: Vec<String>,
    #[serde(default)]
    pub recommended_treatments: Vec<RecommendationItem>,
    #[serde(default)]
    pub preventative_measures: Vec<RecommendationItem>,
    #[serde(default)]
    pub specific_recommendations: Vec<RecommendationItem>,
    #[serde(default)]
    pub additional_notes: Option<String>,
}

/// Strip surrounding whitespace and a Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Parse reasoning output into a [`StructuredDiagnosis`].
///
/// Returns `None` for empty output, invalid JSON, or JSON that is not an
/// object with at least a `general_diagnosis`.
pub fn parse_diagnosis(raw: &str) -> Option<StructuredDiagnosis> {
    let cleaned = strip_code_fence(raw);
    if cleaned.is_empty() {
        tracing::debug!("Reasoning output empty after cleaning");
        return None;
    }
    match serde_json::from_str::<StructuredDiagnosis>(cleaned) {
        Ok(diagnosis) => Some(diagnosis),
        Err(e) => {
            tracing::debug!(error = %e, "Reasoning output is not a structured diagnosis");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "general_diagnosis": "Nitrogen deficiency",
        "possible_causes": ["Low soil organic matter"],
        "recommended_treatments": [{"title": "Fertilize", "description": "Apply urea"}],
        "additional_notes": null
    }"#;

    #[test]
    fn parses_plain_json() {
        let d = parse_diagnosis(SAMPLE).expect("parses");
        assert_eq!(d.general_diagnosis, "Nitrogen deficiency");
        assert_eq!(d.possible_causes.len(), 1);
        assert_eq!(d.recommended_treatments[0].title, "Fertilize");
        assert!(d.preventative_measures.is_empty());
        assert_eq!(d.additional_notes, None);
    }

    #[test]
    fn parses_fenced_json() {
        let fenced = format!("```json\n{SAMPLE}\n```");
        assert!(parse_diagnosis(&fenced).is_some());
    }

    #[test]
    fn free_text_yields_none() {
        assert!(parse_diagnosis("Diagnosis: mild water stress").is_none());
        assert!(parse_diagnosis("   ").is_none());
        assert!(parse_diagnosis("```json\n```").is_none());
    }

    #[test]
    fn non_object_json_yields_none() {
        assert!(parse_diagnosis("[1, 2, 3]").is_none());
        assert!(parse_diagnosis(r#"{"possible_causes": []}"#).is_none());
    }
}
