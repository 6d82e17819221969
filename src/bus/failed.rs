//! Dead-letter records for exhausted event dispatches
//!
//! A `FailedEvent` is written only after a dispatch burns through its
//! whole retry budget. It is never dropped automatically; an operator
//! requeues or discards it through the bus API.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Review status of a dead-lettered dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedEventStatus {
    /// Awaiting operator review
    PendingReview,
    /// Re-published by an operator
    Requeued,
    /// Dropped by an operator
    Discarded,
}

/// Durable record of a dispatch that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEvent {
    /// Unique record id (fev-<uuid>)
    pub id: String,
    /// Name of the failed event
    pub event_name: String,
    /// Full envelope of the original publish, as JSON
    pub payload: serde_json::Value,
    /// Last failure reason
    pub error: String,
    /// Total handler attempts made
    pub attempts: u32,
    /// Review status
    pub status: FailedEventStatus,
    /// First failure timestamp (milliseconds since epoch)
    pub first_failed_at: i64,
    /// Last failure timestamp
    pub last_failed_at: i64,
}

impl FailedEvent {
    /// Create a pending-review record.
    pub fn new(
        event_name: impl Into<String>,
        payload: serde_json::Value,
        error: impl Into<String>,
        attempts: u32,
        first_failed_at: i64,
    ) -> Self {
        Self {
            id: format!("fev-{}", uuid::Uuid::new_v4()),
            event_name: event_name.into(),
            payload,
            error: error.into(),
            attempts,
            status: FailedEventStatus::PendingReview,
            first_failed_at,
            last_failed_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Store for dead-lettered dispatches.
#[async_trait]
pub trait FailedEventStore: Send + Sync {
    /// Persist a new record.
    async fn record(&self, event: FailedEvent) -> Result<()>;

    /// Fetch one record by id.
    async fn get(&self, id: &str) -> Result<Option<FailedEvent>>;

    /// Recent records, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<FailedEvent>>;

    /// Update the review status of a record, returning the updated copy.
    async fn set_status(&self, id: &str, status: FailedEventStatus) -> Result<FailedEvent>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;
}

/// In-memory failed-event store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryFailedEventStore {
    events: Arc<RwLock<Vec<FailedEvent>>>,
}

impl MemoryFailedEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedEventStore for MemoryFailedEventStore {
    async fn record(&self, event: FailedEvent) -> Result<()> {
        tracing::warn!(
            id = %event.id,
            event_name = %event.event_name,
            attempts = event.attempts,
            error = %event.error,
            "Event dead-lettered"
        );
        self.events.write().await.push(event);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FailedEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<FailedEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    async fn set_status(&self, id: &str, status: FailedEventStatus) -> Result<FailedEvent> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("failed event {}", id)))?;
        event.status = status;
        Ok(event.clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.events.read().await.len())
    }
}
