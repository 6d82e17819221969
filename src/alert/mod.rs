//! Crisis alert entities
//!
//! One `CrisisAlert` per detected crisis signal. Alerts are never
//! deleted; resolution is a status change preserved for audit and trend
//! analysis.

use crate::classify::{RiskLevel, Verdict};
use serde::{Deserialize, Serialize};

pub mod audit;
pub mod lifecycle;
pub mod store;

pub use audit::{AuditAction, AuditEntry, AuditStore, MemoryAuditStore, SYSTEM_ACTOR};
pub use lifecycle::AlertManager;
pub use store::{AlertStore, MemoryAlertStore};

/// Lifecycle status of a crisis alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Raised, no staff member has claimed it yet
    Active,
    /// A staff member has claimed visibility
    Acknowledged,
    /// Terminal
    Resolved,
}

impl AlertStatus {
    /// Stable string form matching the wire encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of one detected crisis signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisAlert {
    /// Unique identifier (alert-<uuid>)
    pub id: String,
    /// User who produced the risky message
    pub subject_user_id: String,
    /// Tenant scoping value used for room routing
    pub organization_id: String,
    /// Assigned risk level
    pub risk_level: RiskLevel,
    /// 1-5, derived from risk level and classifier confidence
    pub urgency: u8,
    /// Which classifier path fired
    pub detection_method: String,
    /// Triggering text (truncated to the configured cap)
    pub message: String,
    /// Lifecycle status
    pub status: AlertStatus,
    /// Creation timestamp (milliseconds since epoch)
    pub created_at: i64,
    /// Set exactly once at the acknowledge transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<i64>,
    /// Staff member who acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    /// Set exactly once at the resolve transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
    /// Staff member who resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// Classifier metadata (confidence, indicators), opaque to core logic
    pub screening_data: serde_json::Value,
    /// Idempotency fingerprint over (subject, message, time bucket)
    pub fingerprint: String,
}

impl CrisisAlert {
    /// Create a new active alert from a classifier verdict.
    pub fn new(
        subject_user_id: impl Into<String>,
        organization_id: impl Into<String>,
        verdict: &Verdict,
        message: &str,
        screening_data: serde_json::Value,
        fingerprint: impl Into<String>,
        max_message_len: usize,
    ) -> Self {
        Self {
            id: format!("alert-{}", uuid::Uuid::new_v4()),
            subject_user_id: subject_user_id.into(),
            organization_id: organization_id.into(),
            risk_level: verdict.risk_level,
            urgency: urgency_for(verdict.risk_level, verdict.confidence),
            detection_method: verdict.method.clone(),
            message: truncate_chars(message, max_message_len),
            status: AlertStatus::Active,
            created_at: chrono::Utc::now().timestamp_millis(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            screening_data,
            fingerprint: fingerprint.into(),
        }
    }
}

/// Payload pushed to staff clients over the realtime channel.
///
/// The subject user id is masked; the full record stays behind the
/// staff listing API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPush {
    /// Alert id for acknowledge/resolve calls
    pub alert_id: String,
    /// Masked subject user id
    pub subject_user_id_masked: String,
    /// Assigned risk level
    pub risk_level: RiskLevel,
    /// 1-5 urgency
    pub urgency: u8,
    /// Creation timestamp (milliseconds since epoch)
    pub created_at: i64,
    /// Short excerpt of the triggering text
    pub excerpt: String,
}

/// Excerpt length for realtime pushes.
const EXCERPT_CHARS: usize = 120;

impl AlertPush {
    /// Build the push payload for an alert.
    pub fn from_alert(alert: &CrisisAlert) -> Self {
        Self {
            alert_id: alert.id.clone(),
            subject_user_id_masked: mask_user_id(&alert.subject_user_id),
            risk_level: alert.risk_level,
            urgency: alert.urgency,
            created_at: alert.created_at,
            excerpt: truncate_chars(&alert.message, EXCERPT_CHARS),
        }
    }
}

/// Derive urgency (1-5) from risk level and classifier confidence.
pub fn urgency_for(level: RiskLevel, confidence: f32) -> u8 {
    let base = level.rank();
    let bumped = if confidence >= 0.9 { base + 1 } else { base };
    bumped.clamp(1, 5)
}

/// Mask a user id for push payloads: keep a short prefix, hide the rest.
pub fn mask_user_id(user_id: &str) -> String {
    let head: String = user_id.chars().take(4).collect();
    if user_id.chars().count() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", head)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::METHOD_KEYWORD;

    fn verdict(level: RiskLevel, confidence: f32) -> Verdict {
        Verdict {
            risk_level: level,
            confidence,
            indicators: vec!["kill myself".to_string()],
            method: METHOD_KEYWORD.to_string(),
        }
    }

    #[test]
    fn test_alert_creation() {
        let v = verdict(RiskLevel::Critical, 0.95);
        let alert = CrisisAlert::new(
            "user-1",
            "college-7",
            &v,
            "I want to kill myself",
            serde_json::json!({"confidence": 0.95}),
            "fp-1",
            500,
        );

        assert!(alert.id.starts_with("alert-"));
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.urgency, 5);
        assert_eq!(alert.detection_method, "keyword");
        assert!(alert.acknowledged_at.is_none());
        assert!(alert.created_at > 0);
    }

    #[test]
    fn test_alert_serialization_camel_case() {
        let v = verdict(RiskLevel::High, 0.8);
        let alert = CrisisAlert::new("user-1", "org-1", &v, "msg", serde_json::json!({}), "fp", 500);
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"subjectUserId\""));
        assert!(json.contains("\"riskLevel\":\"high\""));
        assert!(json.contains("\"status\":\"active\""));
        // Unset transition timestamps are omitted
        assert!(!json.contains("acknowledgedAt"));

        let parsed: CrisisAlert = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, alert.id);
    }

    #[test]
    fn test_message_truncated_to_cap() {
        let v = verdict(RiskLevel::High, 0.8);
        let long = "a".repeat(600);
        let alert = CrisisAlert::new("u", "o", &v, &long, serde_json::json!({}), "fp", 500);
        assert_eq!(alert.message.chars().count(), 501); // 500 + ellipsis
    }

    #[test]
    fn test_urgency_derivation() {
        assert_eq!(urgency_for(RiskLevel::Critical, 0.5), 5);
        assert_eq!(urgency_for(RiskLevel::Critical, 0.99), 5);
        assert_eq!(urgency_for(RiskLevel::High, 0.8), 4);
        assert_eq!(urgency_for(RiskLevel::High, 0.95), 5);
        assert_eq!(urgency_for(RiskLevel::Moderate, 0.5), 3);
        assert_eq!(urgency_for(RiskLevel::Minimal, 0.99), 2);
    }

    #[test]
    fn test_mask_user_id() {
        assert_eq!(mask_user_id("user-12345"), "user***");
        assert_eq!(mask_user_id("abc"), "***");
        assert_eq!(mask_user_id("abcd"), "***");
    }

    #[test]
    fn test_push_payload_shape() {
        let v = verdict(RiskLevel::Critical, 0.95);
        let message = "x".repeat(200);
        let alert = CrisisAlert::new("user-12345", "org-1", &v, &message, serde_json::json!({}), "fp", 500);
        let push = AlertPush::from_alert(&alert);

        assert_eq!(push.alert_id, alert.id);
        assert_eq!(push.subject_user_id_masked, "user***");
        assert_eq!(push.excerpt.chars().count(), 121); // 120 + ellipsis
        let json = serde_json::to_string(&push).unwrap();
        assert!(json.contains("\"subjectUserIdMasked\""));
        assert!(json.contains("\"excerpt\""));
    }
}
