//! Alert lifecycle state machine
//!
//! Owns the active → acknowledged → resolved transitions (direct
//! active → resolved is permitted for automated closure). Every
//! transition writes an audit entry; the durable write is the source of
//! truth and a failed follow-up publish never rolls it back.

use crate::alert::audit::{AuditAction, AuditEntry, AuditStore, SYSTEM_ACTOR};
use crate::alert::store::AlertStore;
use crate::alert::{AlertStatus, CrisisAlert};
use crate::bus::{DomainEvent, EventBus};
use crate::classify::{RiskLevel, Verdict};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Owner of the crisis alert state machine.
pub struct AlertManager {
    store: Arc<dyn AlertStore>,
    audit: Arc<dyn AuditStore>,
    bus: Arc<EventBus>,
    max_message_len: usize,
}

impl AlertManager {
    /// Create a manager over the given stores and bus.
    pub fn new(
        store: Arc<dyn AlertStore>,
        audit: Arc<dyn AuditStore>,
        bus: Arc<EventBus>,
        max_message_len: usize,
    ) -> Self {
        Self {
            store,
            audit,
            bus,
            max_message_len,
        }
    }

    /// Raise a new alert from a classifier verdict.
    ///
    /// Idempotent on the fingerprint: when an unresolved alert already
    /// carries it, that alert is returned and nothing new is written.
    pub async fn create(
        &self,
        subject_user_id: &str,
        organization_id: &str,
        verdict: &Verdict,
        message: &str,
        screening_data: serde_json::Value,
        fingerprint: &str,
    ) -> Result<CrisisAlert> {
        if subject_user_id.trim().is_empty() {
            return Err(Error::Validation("subject_user_id must not be empty".into()));
        }
        if organization_id.trim().is_empty() {
            return Err(Error::Validation("organization_id must not be empty".into()));
        }

        if let Some(existing) = self.store.find_active_by_fingerprint(fingerprint).await? {
            tracing::debug!(
                alert_id = %existing.id,
                fingerprint,
                "Duplicate crisis signal collapsed into existing alert"
            );
            return Ok(existing);
        }

        let alert = CrisisAlert::new(
            subject_user_id,
            organization_id,
            verdict,
            message,
            screening_data,
            fingerprint,
            self.max_message_len,
        );

        self.store
            .insert(alert.clone())
            .await
            .map_err(|e| Error::Dispatch(format!("alert write failed: {}", e)))?;

        self.audit
            .append(AuditEntry::new(
                &alert.id,
                SYSTEM_ACTOR,
                AuditAction::Create,
                serde_json::json!({
                    "riskLevel": alert.risk_level,
                    "urgency": alert.urgency,
                    "detectionMethod": alert.detection_method,
                }),
            ))
            .await?;

        tracing::warn!(
            alert_id = %alert.id,
            organization_id = %alert.organization_id,
            risk_level = %alert.risk_level,
            urgency = alert.urgency,
            "Crisis alert raised"
        );

        Ok(alert)
    }

    /// Claim visibility of an active alert.
    ///
    /// Fails with `Error::InvalidState` unless the alert is currently
    /// active; exactly one of two concurrent claims succeeds.
    pub async fn acknowledge(&self, alert_id: &str, actor_id: &str) -> Result<CrisisAlert> {
        let now = chrono::Utc::now().timestamp_millis();
        let alert = self
            .store
            .transition(
                alert_id,
                &[AlertStatus::Active],
                AlertStatus::Acknowledged,
                actor_id,
                now,
            )
            .await?;

        self.audit
            .append(AuditEntry::new(
                alert_id,
                actor_id,
                AuditAction::Acknowledge,
                serde_json::json!({}),
            ))
            .await?;

        let event = DomainEvent::AlertAcknowledged {
            alert_id: alert_id.to_string(),
            organization_id: alert.organization_id.clone(),
            acknowledged_by: actor_id.to_string(),
        };
        if let Err(e) = self.bus.publish(event).await {
            // The durable transition already happened; the claim
            // notification is best-effort.
            tracing::warn!(alert_id, error = %e, "Failed to publish acknowledge event");
        }

        tracing::info!(alert_id, actor = actor_id, "Alert acknowledged");
        Ok(alert)
    }

    /// Close an alert. Valid from active or acknowledged.
    pub async fn resolve(&self, alert_id: &str, actor_id: &str) -> Result<CrisisAlert> {
        let now = chrono::Utc::now().timestamp_millis();
        let alert = self
            .store
            .transition(
                alert_id,
                &[AlertStatus::Active, AlertStatus::Acknowledged],
                AlertStatus::Resolved,
                actor_id,
                now,
            )
            .await?;

        self.audit
            .append(AuditEntry::new(
                alert_id,
                actor_id,
                AuditAction::Resolve,
                serde_json::json!({}),
            ))
            .await?;

        tracing::info!(alert_id, actor = actor_id, "Alert resolved");
        Ok(alert)
    }

    /// Fetch one alert.
    pub async fn get(&self, alert_id: &str) -> Result<CrisisAlert> {
        self.store
            .get(alert_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("alert {}", alert_id)))
    }

    /// Unresolved alerts for one organization, newest first.
    pub async fn list_active(&self, organization_id: &str) -> Result<Vec<CrisisAlert>> {
        self.store.list_active(organization_id).await
    }

    /// Full audit trail for one alert, oldest first.
    pub async fn audit_trail(&self, alert_id: &str) -> Result<Vec<AuditEntry>> {
        self.audit.by_alert(alert_id).await
    }

    /// Alert counts grouped by risk level.
    pub async fn counts_by_level(&self) -> Result<HashMap<RiskLevel, u64>> {
        self.store.counts_by_level().await
    }
}
