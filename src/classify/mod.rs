//! Crisis risk classification
//!
//! Turns one message (plus optional recent history) into a structured
//! risk verdict. A fast keyword heuristic runs first; only inconclusive
//! screens escalate to the external inference backend, under a bounded
//! timeout and a concurrency semaphore. Every failure mode on the
//! inference path falls back to the heuristic verdict, so classification
//! itself never errors and never blocks indefinitely.

use crate::config::ClassifierConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub mod inference;
pub mod keywords;

pub use inference::{parse_verdict, InferenceClient, InferenceVerdict};
pub use keywords::{KeywordScreen, ScreenOutcome};

/// Ordered risk level assigned to a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No risk signal
    #[default]
    Minimal,
    /// Mild signal, watch only
    Low,
    /// Clear distress, staff attention warranted
    Moderate,
    /// Elevated risk
    High,
    /// Acute crisis
    Critical,
}

impl RiskLevel {
    /// Numeric rank, 1 (minimal) through 5 (critical).
    pub fn rank(self) -> u8 {
        match self {
            RiskLevel::Minimal => 1,
            RiskLevel::Low => 2,
            RiskLevel::Moderate => 3,
            RiskLevel::High => 4,
            RiskLevel::Critical => 5,
        }
    }

    /// Stable string form matching the wire encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Assigned risk level
    pub risk_level: RiskLevel,
    /// Confidence in 0..1, always populated
    pub confidence: f32,
    /// Matched indicators
    pub indicators: Vec<String>,
    /// Which classifier path fired (`keyword` or `inference`)
    pub method: String,
}

/// Detection method tag for the heuristic path.
pub const METHOD_KEYWORD: &str = "keyword";
/// Detection method tag for the inference path.
pub const METHOD_INFERENCE: &str = "inference";

/// Message classifier: keyword heuristic with optional inference escalation.
pub struct Classifier {
    screen: KeywordScreen,
    inference: Option<Arc<dyn InferenceClient>>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Classifier {
    /// Build a heuristic-only classifier from configuration.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            screen: KeywordScreen::new(config)?,
            inference: None,
            permits: Arc::new(Semaphore::new(config.inference_permits.max(1))),
            timeout: Duration::from_millis(config.inference_timeout_ms),
        })
    }

    /// Attach an external inference backend for inconclusive screens.
    pub fn with_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    /// Classify one message. Infallible: inference failures are absorbed
    /// and the heuristic verdict stands.
    pub async fn classify(&self, message: &str, recent_history: &[String]) -> Verdict {
        let outcome = self.screen.screen(message, recent_history);
        let heuristic = heuristic_verdict(&outcome);

        if outcome.conclusive {
            return heuristic;
        }

        let client = match &self.inference {
            Some(client) => Arc::clone(client),
            None => return heuristic,
        };

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return heuristic,
        };

        let prompt = inference::build_prompt(message, recent_history);
        let raw = match tokio::time::timeout(self.timeout, client.infer(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Inference call failed, using heuristic verdict");
                return heuristic;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Inference call timed out, using heuristic verdict"
                );
                return heuristic;
            }
        };

        match parse_verdict(&raw) {
            Ok(refined) => merge_verdicts(&outcome, heuristic, refined),
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable inference response, using heuristic verdict");
                heuristic
            }
        }
    }
}

/// Fixed confidence bands for the heuristic path.
fn heuristic_verdict(outcome: &ScreenOutcome) -> Verdict {
    let confidence = if outcome.conclusive {
        if outcome.indicators.is_empty() {
            // Clearly safe
            0.9
        } else {
            // Keyword-confirmed crisis; scales with indicator count
            0.75 + 0.05 * outcome.indicators.len().min(4) as f32
        }
    } else {
        0.5
    };

    Verdict {
        risk_level: outcome.level,
        confidence,
        indicators: outcome.indicators.clone(),
        method: METHOD_KEYWORD.to_string(),
    }
}

/// Merge an inference verdict into the heuristic one.
///
/// When the heuristic matched any term the merged level never drops
/// below it; the inference path refines upward only.
fn merge_verdicts(outcome: &ScreenOutcome, heuristic: Verdict, refined: InferenceVerdict) -> Verdict {
    let risk_level = if outcome.indicators.is_empty() {
        refined.risk_level
    } else {
        heuristic.risk_level.max(refined.risk_level)
    };

    let mut indicators = heuristic.indicators;
    for indicator in refined.indicators {
        if !indicators.contains(&indicator) {
            indicators.push(indicator);
        }
    }

    Verdict {
        risk_level,
        confidence: refined.confidence,
        indicators,
        method: METHOD_INFERENCE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;

    struct FixedInference(String);

    #[async_trait]
    impl InferenceClient for FixedInference {
        async fn infer(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingInference;

    #[async_trait]
    impl InferenceClient for FailingInference {
        async fn infer(&self, _prompt: &str) -> Result<String> {
            Err(Error::ClassifierUnavailable("backend down".into()))
        }
    }

    struct SlowInference;

    #[async_trait]
    impl InferenceClient for SlowInference {
        async fn infer(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("{}".to_string())
        }
    }

    fn classifier() -> Classifier {
        Classifier::new(&ClassifierConfig::default()).unwrap()
    }

    fn fast_config() -> ClassifierConfig {
        ClassifierConfig {
            inference_timeout_ms: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_critical_keyword_is_critical() {
        let verdict = classifier().classify("I want to kill myself", &[]).await;
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
        assert_eq!(verdict.method, METHOD_KEYWORD);
        assert!(verdict.confidence >= 0.75);
    }

    #[tokio::test]
    async fn test_clean_message_is_minimal() {
        let verdict = classifier().classify("I had a great day", &[]).await;
        assert_eq!(verdict.risk_level, RiskLevel::Minimal);
        assert!((verdict.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_inference_refines_inconclusive_screen() {
        let client = Arc::new(FixedInference(
            r#"{"riskLevel": "high", "confidence": 0.88, "indicators": ["withdrawal"]}"#.into(),
        ));
        let classifier = classifier().with_inference(client);

        let verdict = classifier
            .classify("everything feels hopeless lately", &[])
            .await;
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert_eq!(verdict.method, METHOD_INFERENCE);
        assert!(verdict.indicators.iter().any(|i| i == "withdrawal"));
    }

    #[tokio::test]
    async fn test_inference_never_downgrades_keyword_match() {
        let client = Arc::new(FixedInference(
            r#"{"riskLevel": "minimal", "confidence": 0.99}"#.into(),
        ));
        let classifier = classifier().with_inference(client);

        // Negated critical term: heuristic High, inconclusive
        let verdict = classifier.classify("I would never kill myself", &[]).await;
        assert_eq!(verdict.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_failed_inference_falls_back_to_heuristic() {
        let classifier = classifier().with_inference(Arc::new(FailingInference));
        let verdict = classifier
            .classify("everything feels hopeless lately", &[])
            .await;
        assert_eq!(verdict.risk_level, RiskLevel::Moderate);
        assert_eq!(verdict.method, METHOD_KEYWORD);
    }

    #[tokio::test]
    async fn test_timed_out_inference_falls_back_to_heuristic() {
        let classifier = Classifier::new(&fast_config())
            .unwrap()
            .with_inference(Arc::new(SlowInference));
        let verdict = classifier
            .classify("everything feels hopeless lately", &[])
            .await;
        assert_eq!(verdict.risk_level, RiskLevel::Moderate);
        assert_eq!(verdict.method, METHOD_KEYWORD);
    }

    #[tokio::test]
    async fn test_malformed_inference_falls_back_to_heuristic() {
        let client = Arc::new(FixedInference("I cannot assess this".into()));
        let classifier = classifier().with_inference(client);
        let verdict = classifier
            .classify("everything feels hopeless lately", &[])
            .await;
        assert_eq!(verdict.risk_level, RiskLevel::Moderate);
    }

    #[tokio::test]
    async fn test_conclusive_screen_skips_inference() {
        // Backend would say minimal; a conclusive critical screen must not ask it
        let client = Arc::new(FixedInference(
            r#"{"riskLevel": "minimal", "confidence": 0.99}"#.into(),
        ));
        let classifier = classifier().with_inference(client);
        let verdict = classifier.classify("I want to kill myself", &[]).await;
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
        assert_eq!(verdict.method, METHOD_KEYWORD);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Moderate);
        assert!(RiskLevel::Moderate > RiskLevel::Low);
        assert!(RiskLevel::Low > RiskLevel::Minimal);
        assert_eq!(RiskLevel::Critical.rank(), 5);
        assert_eq!(RiskLevel::Minimal.rank(), 1);
    }

    #[test]
    fn test_risk_level_serialization() {
        let json = serde_json::to_string(&RiskLevel::Moderate).unwrap();
        assert_eq!(json, "\"moderate\"");
        let parsed: RiskLevel = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(parsed, RiskLevel::Critical);
    }
}
