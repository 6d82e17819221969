//! External inference contract and defensive verdict parsing
//!
//! The inference backend is treated as an unreliable black box that
//! returns free text. Callers strip markdown fences, parse the remainder
//! as strict JSON, and fall back to the heuristic verdict on any failure.

use crate::classify::RiskLevel;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// One synchronous call into the external inference backend.
///
/// Implementations wrap whatever transport the deployment uses (HTTP,
/// local model, test stub). The caller owns timeout and concurrency
/// bounds; implementations should not retry internally.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run the prompt and return the raw response text.
    async fn infer(&self, prompt: &str) -> Result<String>;
}

/// A structured verdict parsed from an inference response.
#[derive(Debug, Clone)]
pub struct InferenceVerdict {
    /// Risk level the backend assigned
    pub risk_level: RiskLevel,
    /// Confidence in 0..1
    pub confidence: f32,
    /// Free-form indicator strings from the backend
    pub indicators: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerdictWire {
    risk_level: String,
    confidence: f32,
    #[serde(default)]
    indicators: Vec<String>,
}

/// Build the screening prompt for one message plus recent history.
pub(crate) fn build_prompt(message: &str, history: &[String]) -> String {
    let mut prompt = String::from(
        "Assess the self-harm risk of the final student message. Respond with \
         JSON only: {\"riskLevel\": \"minimal|low|moderate|high|critical\", \
         \"confidence\": 0.0-1.0, \"indicators\": [\"...\"]}.\n",
    );
    for entry in history.iter().rev().take(5).rev() {
        prompt.push_str("Earlier: ");
        prompt.push_str(entry);
        prompt.push('\n');
    }
    prompt.push_str("Message: ");
    prompt.push_str(message);
    prompt
}

/// Parse a raw inference response into a structured verdict.
///
/// Strips markdown code fences, requires the documented JSON shape, and
/// rejects unknown risk levels so a malformed response can never rank a
/// message instead of the heuristic.
pub fn parse_verdict(raw: &str) -> Result<InferenceVerdict> {
    let cleaned = extract_json(raw);
    let wire: VerdictWire = serde_json::from_str(cleaned)?;

    let risk_level = parse_risk_level(&wire.risk_level)?;

    Ok(InferenceVerdict {
        risk_level,
        confidence: wire.confidence.clamp(0.0, 1.0),
        indicators: wire.indicators,
    })
}

fn parse_risk_level(value: &str) -> Result<RiskLevel> {
    match value.trim().to_lowercase().as_str() {
        "minimal" => Ok(RiskLevel::Minimal),
        "low" => Ok(RiskLevel::Low),
        "moderate" => Ok(RiskLevel::Moderate),
        "high" => Ok(RiskLevel::High),
        "critical" => Ok(RiskLevel::Critical),
        other => Err(Error::ClassifierUnavailable(format!(
            "unknown risk level '{}' in inference response",
            other
        ))),
    }
}

/// Extract JSON from text that may contain markdown fences or prose.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if start <= end {
                return &trimmed[start..=end];
            }
        }
    }

    trimmed
}
