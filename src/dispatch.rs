//! End-to-end dispatch orchestration
//!
//! Receives a user message, classifies it, raises an alert when the
//! verdict clears the configured floor, and publishes the domain event
//! whose handlers fan the alert out to the organization's counselor
//! room and the admin room.
//!
//! Failure split: if the durable alert write fails the whole call fails
//! loudly; if only the realtime push fails the alert stays recorded and
//! the bus's retry/dead-letter path captures the failure.

use crate::alert::{AlertManager, AlertPush, AuditAction, AuditEntry, AuditStore};
use crate::bus::{
    DomainEvent, EventBus, EventHandler, EVENT_ALERT_ACKNOWLEDGED, EVENT_HIGH_RISK_DETECTED,
};
use crate::classify::{Classifier, Verdict};
use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::realtime::{org_room, RealtimeRouter, ADMIN_ROOM};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Realtime event name for a raised alert.
pub const PUSH_CRISIS_ALERT: &str = "crisis_alert";
/// Realtime event name for a claimed alert.
pub const PUSH_ALERT_ACKNOWLEDGED: &str = "alert_acknowledged";

/// Outcome of handling one message.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Whether an alert was raised (or an existing one matched)
    pub alert_raised: bool,
    /// Id of the raised alert, when there is one
    pub alert_id: Option<String>,
    /// The classifier verdict
    pub verdict: Verdict,
}

/// Orchestrates classification, alert creation, and event publishing.
pub struct Dispatcher {
    classifier: Arc<Classifier>,
    manager: Arc<AlertManager>,
    bus: Arc<EventBus>,
    audit: Arc<dyn AuditStore>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher over the assembled components.
    pub fn new(
        classifier: Arc<Classifier>,
        manager: Arc<AlertManager>,
        bus: Arc<EventBus>,
        audit: Arc<dyn AuditStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            classifier,
            manager,
            bus,
            audit,
            config,
        }
    }

    /// Handle one inbound user message.
    ///
    /// The sender never sees an error for anything past the durable
    /// write: classification failures fall back internally and push
    /// failures are isolated by the bus.
    pub async fn handle_message(
        &self,
        subject_user_id: &str,
        organization_id: &str,
        message: &str,
        recent_history: &[String],
    ) -> Result<DispatchOutcome> {
        if subject_user_id.trim().is_empty() || organization_id.trim().is_empty() {
            return Err(Error::Validation(
                "subject_user_id and organization_id must not be empty".into(),
            ));
        }

        let verdict = self.classifier.classify(message, recent_history).await;
        tracing::debug!(
            subject = %subject_user_id,
            organization_id,
            risk_level = %verdict.risk_level,
            confidence = verdict.confidence,
            method = %verdict.method,
            "Message classified"
        );

        // Screening feed for the analytics collaborator; delivery is
        // best-effort and must not affect the dispatch result.
        if let Err(e) = self
            .bus
            .publish(DomainEvent::ChatMessageSent {
                subject_user_id: subject_user_id.to_string(),
                organization_id: organization_id.to_string(),
                risk_level: verdict.risk_level,
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to publish screening event");
        }

        if verdict.risk_level < self.config.risk_floor {
            return Ok(DispatchOutcome {
                alert_raised: false,
                alert_id: None,
                verdict,
            });
        }

        let fingerprint = fingerprint(
            subject_user_id,
            message,
            self.config.dedup_bucket_secs,
            chrono::Utc::now().timestamp_millis(),
        );
        let screening_data = serde_json::json!({
            "confidence": verdict.confidence,
            "indicators": verdict.indicators,
            "method": verdict.method,
        });

        let alert = self
            .manager
            .create(
                subject_user_id,
                organization_id,
                &verdict,
                message,
                screening_data,
                &fingerprint,
            )
            .await?;

        if let Err(e) = self
            .bus
            .publish(DomainEvent::HighRiskDetected {
                alert_id: alert.id.clone(),
                organization_id: alert.organization_id.clone(),
                risk_level: alert.risk_level,
                urgency: alert.urgency,
            })
            .await
        {
            // The alert is durably recorded and discoverable via
            // list_active; only the notification path degraded.
            tracing::warn!(alert_id = %alert.id, error = %e, "Failed to publish alert event");
        }

        Ok(DispatchOutcome {
            alert_raised: true,
            alert_id: Some(alert.id),
            verdict,
        })
    }

    /// Re-publish a dead-lettered dispatch, auditing it against the
    /// alert it names.
    pub async fn requeue_failed(&self, failed_id: &str, actor_id: &str) -> Result<()> {
        let record = self
            .bus
            .failed_event(failed_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("failed event {}", failed_id)))?;

        self.bus.requeue(failed_id).await?;

        let alert_id = serde_json::from_value::<crate::bus::EventEnvelope>(record.payload)
            .ok()
            .and_then(|env| env.event.alert_id().map(str::to_string));
        if let Some(alert_id) = alert_id {
            self.audit
                .append(AuditEntry::new(
                    alert_id,
                    actor_id,
                    AuditAction::Requeue,
                    serde_json::json!({"failedEventId": failed_id}),
                ))
                .await?;
        }

        Ok(())
    }
}

/// Idempotency fingerprint: SHA-256 over subject, message, and the
/// containing time bucket. Duplicate publishes for the same message in
/// one bucket map to the same alert.
pub fn fingerprint(subject_user_id: &str, message: &str, bucket_secs: u64, now_millis: i64) -> String {
    let bucket = if bucket_secs == 0 {
        0
    } else {
        now_millis / 1_000 / bucket_secs as i64
    };
    let mut hasher = Sha256::new();
    hasher.update(subject_user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(message.as_bytes());
    hasher.update([0u8]);
    hasher.update(bucket.to_be_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Fans a raised alert out to the organization room and the admin room.
pub struct BroadcastAlertHandler {
    router: Arc<RealtimeRouter>,
    manager: Arc<AlertManager>,
}

impl BroadcastAlertHandler {
    /// Create the handler.
    pub fn new(router: Arc<RealtimeRouter>, manager: Arc<AlertManager>) -> Self {
        Self { router, manager }
    }
}

#[async_trait]
impl EventHandler for BroadcastAlertHandler {
    fn name(&self) -> &str {
        "broadcast-crisis-alert"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let (alert_id, organization_id) = match event {
            DomainEvent::HighRiskDetected {
                alert_id,
                organization_id,
                ..
            } => (alert_id, organization_id),
            _ => return Ok(()),
        };

        let alert = self.manager.get(alert_id).await?;
        let payload = serde_json::to_value(AlertPush::from_alert(&alert))?;

        self.router
            .broadcast(&org_room(organization_id), PUSH_CRISIS_ALERT, &payload)
            .await;
        self.router
            .broadcast(ADMIN_ROOM, PUSH_CRISIS_ALERT, &payload)
            .await;
        Ok(())
    }
}

/// Notifies room members that an alert has been claimed, so other staff
/// stop responding to it.
pub struct AcknowledgedHandler {
    router: Arc<RealtimeRouter>,
}

impl AcknowledgedHandler {
    /// Create the handler.
    pub fn new(router: Arc<RealtimeRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for AcknowledgedHandler {
    fn name(&self) -> &str {
        "broadcast-alert-acknowledged"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let (alert_id, organization_id, acknowledged_by) = match event {
            DomainEvent::AlertAcknowledged {
                alert_id,
                organization_id,
                acknowledged_by,
            } => (alert_id, organization_id, acknowledged_by),
            _ => return Ok(()),
        };

        let payload = serde_json::json!({
            "alertId": alert_id,
            "acknowledgedBy": acknowledged_by,
        });
        self.router
            .broadcast(&org_room(organization_id), PUSH_ALERT_ACKNOWLEDGED, &payload)
            .await;
        self.router
            .broadcast(ADMIN_ROOM, PUSH_ALERT_ACKNOWLEDGED, &payload)
            .await;
        Ok(())
    }
}

/// Register the default fan-out handlers on a bus.
pub async fn register_broadcast_handlers(
    bus: &EventBus,
    router: Arc<RealtimeRouter>,
    manager: Arc<AlertManager>,
    options: crate::bus::HandlerOptions,
) {
    bus.register_handler(
        EVENT_HIGH_RISK_DETECTED,
        Arc::new(BroadcastAlertHandler::new(Arc::clone(&router), manager)),
        options,
    )
    .await;
    bus.register_handler(
        EVENT_ALERT_ACKNOWLEDGED,
        Arc::new(AcknowledgedHandler::new(router)),
        options,
    )
    .await;
}
