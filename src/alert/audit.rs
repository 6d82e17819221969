//! Append-only audit trail for alert lifecycle actions
//!
//! Every state-changing action on a crisis alert (create, acknowledge,
//! resolve, requeue) appends one entry. The store exposes no mutation
//! or deletion API.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Actor id recorded for actions the system performs on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// State-changing action on a crisis alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Alert raised
    Create,
    /// Staff member claimed visibility
    Acknowledge,
    /// Alert closed
    Resolve,
    /// Dead-lettered dispatch re-queued
    Requeue,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique entry id
    pub id: String,
    /// Alert this entry refers to
    pub alert_id: String,
    /// Staff member id or `system`
    pub actor_id: String,
    /// Action performed
    pub action: AuditAction,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: i64,
    /// Structured action context
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(
        alert_id: impl Into<String>,
        actor_id: impl Into<String>,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            actor_id: actor_id.into(),
            action,
            timestamp: chrono::Utc::now().timestamp_millis(),
            details,
        }
    }
}

/// Append-only audit store.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one entry.
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    /// All entries for one alert, oldest first.
    async fn by_alert(&self, alert_id: &str) -> Result<Vec<AuditEntry>>;

    /// Most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// In-memory audit store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        tracing::debug!(
            alert_id = %entry.alert_id,
            actor = %entry.actor_id,
            action = ?entry.action,
            "Audit entry appended"
        );
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn by_alert(&self, alert_id: &str) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
