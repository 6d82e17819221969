//! Configuration for the alerting core
//!
//! All sections deserialize with `#[serde(default)]` so a partial config
//! file only overrides the fields it names.

use crate::classify::RiskLevel;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the alerting core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Classifier settings (term lists, inference bounds)
    pub classifier: ClassifierConfig,
    /// Event bus settings (workers, backoff)
    pub bus: BusConfig,
    /// Realtime router settings
    pub realtime: RealtimeConfig,
    /// Dispatcher settings (risk floor, dedup window)
    pub dispatch: DispatchConfig,
}

/// Configuration for the crisis classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Terms that indicate acute crisis on their own
    pub critical_terms: Vec<String>,
    /// Terms that indicate elevated risk
    pub high_terms: Vec<String>,
    /// Terms that indicate distress but need more context
    pub distress_terms: Vec<String>,
    /// Max characters between a negator and a term for the negation
    /// window to apply
    pub negation_window_chars: usize,
    /// Timeout for one external inference call (milliseconds)
    pub inference_timeout_ms: u64,
    /// Max simultaneous external inference calls
    pub inference_permits: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            critical_terms: default_critical_terms(),
            high_terms: default_high_terms(),
            distress_terms: default_distress_terms(),
            negation_window_chars: 12,
            inference_timeout_ms: 5_000,
            inference_permits: 8,
        }
    }
}

/// Configuration for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Worker tasks for deferred dispatch
    pub worker_count: usize,
    /// Base delay in milliseconds for exponential retry backoff
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_delay_ms: u64,
    /// Recent-event backlog capacity
    pub backlog_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            base_delay_ms: 250,
            max_delay_ms: 30_000,
            backlog_capacity: 256,
        }
    }
}

/// Configuration for the realtime router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Per-connection write timeout in milliseconds; a connection that
    /// cannot accept a write within this window is dropped from its rooms
    pub write_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2_000,
        }
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Verdicts below this level never raise an alert
    pub risk_floor: RiskLevel,
    /// Width of the idempotency time bucket in seconds; duplicate
    /// publishes for the same message within one bucket collapse into
    /// a single alert
    pub dedup_bucket_secs: u64,
    /// Stored alert message cap in characters
    pub max_message_len: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            risk_floor: RiskLevel::Moderate,
            dedup_bucket_secs: 300,
            max_message_len: 500,
        }
    }
}

fn default_critical_terms() -> Vec<String> {
    [
        "kill myself",
        "killing myself",
        "suicide",
        "suicidal",
        "end my life",
        "take my own life",
        "want to die",
        "wanna die",
        "end it all",
        "better off dead",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_high_terms() -> Vec<String> {
    [
        "hurt myself",
        "hurting myself",
        "self harm",
        "self-harm",
        "cut myself",
        "cutting myself",
        "overdose",
        "no reason to live",
        "can't go on",
        "cant go on",
        "better off without me",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_distress_terms() -> Vec<String> {
    [
        "hopeless",
        "worthless",
        "hate myself",
        "no one cares",
        "nobody cares",
        "give up",
        "empty inside",
        "can't take it",
        "cant take it",
        "so alone",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.classifier.inference_timeout_ms, 5_000);
        assert_eq!(config.classifier.inference_permits, 8);
        assert_eq!(config.bus.worker_count, 4);
        assert_eq!(config.dispatch.risk_floor, RiskLevel::Moderate);
        assert_eq!(config.dispatch.dedup_bucket_secs, 300);
        assert!(!config.classifier.critical_terms.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"dispatch": {"risk_floor": "high"}}"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.dispatch.risk_floor, RiskLevel::High);
        // Untouched sections keep their defaults
        assert_eq!(config.dispatch.dedup_bucket_secs, 300);
        assert_eq!(config.bus.worker_count, 4);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.realtime.write_timeout_ms, 2_000);
        assert_eq!(
            parsed.classifier.critical_terms,
            config.classifier.critical_terms
        );
    }
}
