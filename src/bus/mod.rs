//! Domain event bus
//!
//! Publishes typed domain events to registered handlers, either inline
//! (handler runs inside the publishing call) or deferred (handlers run
//! on an in-process worker pool). Both modes share identical retry
//! semantics: on handler error, retry with backoff; after the budget is
//! exhausted, persist a `FailedEvent` and stop. Handlers must be safe to
//! invoke more than once for the same logical event.

use crate::classify::RiskLevel;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};

pub mod executor;
pub mod failed;

pub use executor::RetryPolicy;
pub use failed::{FailedEvent, FailedEventStatus, FailedEventStore, MemoryFailedEventStore};

use crate::config::BusConfig;
use executor::DispatchJob;

/// Event name for a detected high-risk user.
pub const EVENT_HIGH_RISK_DETECTED: &str = "user/high-risk-detected";
/// Event name for a claimed alert.
pub const EVENT_ALERT_ACKNOWLEDGED: &str = "alert-acknowledged";
/// Event name for a screened chat message.
pub const EVENT_CHAT_MESSAGE_SENT: &str = "chat/message-sent";

/// Typed domain events with fixed payload shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    /// A message classified at or above the dispatch floor raised an alert
    HighRiskDetected {
        alert_id: String,
        organization_id: String,
        risk_level: RiskLevel,
        urgency: u8,
    },
    /// A staff member claimed an alert
    AlertAcknowledged {
        alert_id: String,
        organization_id: String,
        acknowledged_by: String,
    },
    /// A message passed through screening (any risk level)
    ChatMessageSent {
        subject_user_id: String,
        organization_id: String,
        risk_level: RiskLevel,
    },
}

impl DomainEvent {
    /// Wire name used for handler registration.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::HighRiskDetected { .. } => EVENT_HIGH_RISK_DETECTED,
            DomainEvent::AlertAcknowledged { .. } => EVENT_ALERT_ACKNOWLEDGED,
            DomainEvent::ChatMessageSent { .. } => EVENT_CHAT_MESSAGE_SENT,
        }
    }

    /// Alert id carried by this event, when there is one.
    pub fn alert_id(&self) -> Option<&str> {
        match self {
            DomainEvent::HighRiskDetected { alert_id, .. }
            | DomainEvent::AlertAcknowledged { alert_id, .. } => Some(alert_id),
            DomainEvent::ChatMessageSent { .. } => None,
        }
    }
}

/// A published event with its dispatch identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique envelope id (evt-<uuid>)
    pub id: String,
    /// The event
    pub event: DomainEvent,
    /// Publish timestamp (milliseconds since epoch)
    pub published_at: i64,
}

impl EventEnvelope {
    fn new(event: DomainEvent) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            event,
            published_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Receipt returned by `publish`.
#[derive(Debug, Clone)]
pub struct EventHandle {
    /// Envelope id of the publish
    pub event_id: String,
    /// Number of handlers the event was dispatched to
    pub dispatched: usize,
}

/// Per-handler dispatch options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HandlerOptions {
    /// Retries after the initial attempt before dead-lettering
    pub retries: u32,
    /// Max simultaneous executions of this handler
    pub concurrency_limit: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            concurrency_limit: 4,
        }
    }
}

/// A handler for one event name.
///
/// Handlers must be idempotent: the bus guarantees at-least-once
/// invocation, not exactly-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler id used in logs and dead-letter records.
    fn name(&self) -> &str;

    /// Process one event.
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// A handler with its options and concurrency permits.
#[derive(Clone)]
pub(crate) struct RegisteredHandler {
    pub(crate) id: String,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) options: HandlerOptions,
    pub(crate) permits: Arc<Semaphore>,
}

/// Domain event bus with inline or deferred handler execution.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<RegisteredHandler>>>,
    failed: Arc<dyn FailedEventStore>,
    retry: RetryPolicy,
    backlog: RwLock<VecDeque<EventEnvelope>>,
    backlog_capacity: usize,
    queue: Option<mpsc::UnboundedSender<DispatchJob>>,
}

impl EventBus {
    /// Create a bus that runs handlers inside the publishing call.
    pub fn inline(failed: Arc<dyn FailedEventStore>, config: &BusConfig) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            failed,
            retry: RetryPolicy {
                base_delay_ms: config.base_delay_ms,
                max_delay_ms: config.max_delay_ms,
            },
            backlog: RwLock::new(VecDeque::with_capacity(config.backlog_capacity)),
            backlog_capacity: config.backlog_capacity,
            queue: None,
        }
    }

    /// Create a bus that queues dispatches to an in-process worker pool.
    ///
    /// Must be called inside a tokio runtime: workers are spawned here.
    pub fn deferred(failed: Arc<dyn FailedEventStore>, config: &BusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        executor::spawn_workers(
            config.worker_count,
            rx,
            Arc::clone(&failed),
            RetryPolicy {
                base_delay_ms: config.base_delay_ms,
                max_delay_ms: config.max_delay_ms,
            },
        );
        Self {
            handlers: RwLock::new(HashMap::new()),
            failed,
            retry: RetryPolicy {
                base_delay_ms: config.base_delay_ms,
                max_delay_ms: config.max_delay_ms,
            },
            backlog: RwLock::new(VecDeque::with_capacity(config.backlog_capacity)),
            backlog_capacity: config.backlog_capacity,
            queue: Some(tx),
        }
    }

    /// Execution mode label (`inline` or `deferred`).
    pub fn mode(&self) -> &'static str {
        if self.queue.is_some() {
            "deferred"
        } else {
            "inline"
        }
    }

    /// Register a handler for one event name.
    pub async fn register_handler(
        &self,
        event_name: &str,
        handler: Arc<dyn EventHandler>,
        options: HandlerOptions,
    ) {
        let registered = RegisteredHandler {
            id: handler.name().to_string(),
            permits: Arc::new(Semaphore::new(options.concurrency_limit.max(1))),
            handler,
            options,
        };
        tracing::info!(
            event_name,
            handler = %registered.id,
            retries = options.retries,
            concurrency_limit = options.concurrency_limit,
            "Handler registered"
        );
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_name.to_string())
            .or_default()
            .push(registered);
    }

    /// Publish a domain event.
    ///
    /// Handler failures are never surfaced here; they are retried and
    /// then dead-lettered by the dispatch path.
    pub async fn publish(&self, event: DomainEvent) -> Result<EventHandle> {
        let envelope = EventEnvelope::new(event);
        let dispatched = self.dispatch_envelope(envelope.clone()).await;
        Ok(EventHandle {
            event_id: envelope.id,
            dispatched,
        })
    }

    async fn dispatch_envelope(&self, envelope: EventEnvelope) -> usize {
        {
            let mut backlog = self.backlog.write().await;
            if backlog.len() >= self.backlog_capacity {
                backlog.pop_front();
            }
            backlog.push_back(envelope.clone());
        }

        let registered: Vec<RegisteredHandler> = {
            let handlers = self.handlers.read().await;
            handlers
                .get(envelope.event.name())
                .cloned()
                .unwrap_or_default()
        };

        let dispatched = registered.len();
        for handler in registered {
            match &self.queue {
                Some(tx) => {
                    let job = DispatchJob {
                        envelope: envelope.clone(),
                        handler,
                    };
                    if tx.send(job).is_err() {
                        tracing::error!(
                            event_id = %envelope.id,
                            "Dispatch queue closed, dropping deferred job"
                        );
                    }
                }
                None => {
                    executor::run_dispatch(
                        envelope.clone(),
                        handler,
                        Arc::clone(&self.failed),
                        self.retry,
                    )
                    .await;
                }
            }
        }
        dispatched
    }

    /// Snapshot of recently published envelopes, oldest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<EventEnvelope> {
        let backlog = self.backlog.read().await;
        let skip = backlog.len().saturating_sub(limit);
        backlog.iter().skip(skip).cloned().collect()
    }

    /// Recent dead-lettered dispatches, newest first.
    pub async fn failed_events(&self, limit: usize) -> Result<Vec<FailedEvent>> {
        self.failed.list(limit).await
    }

    /// Fetch one dead-lettered dispatch by id.
    pub async fn failed_event(&self, failed_id: &str) -> Result<Option<FailedEvent>> {
        self.failed.get(failed_id).await
    }

    /// Re-publish a dead-lettered dispatch and mark it requeued.
    pub async fn requeue(&self, failed_id: &str) -> Result<EventHandle> {
        let record = self
            .failed
            .get(failed_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("failed event {}", failed_id)))?;

        let envelope: EventEnvelope = serde_json::from_value(record.payload.clone())?;

        self.failed
            .set_status(failed_id, FailedEventStatus::Requeued)
            .await?;
        tracing::info!(
            failed_id,
            event_id = %envelope.id,
            event_name = %envelope.event.name(),
            "Dead-lettered event requeued"
        );

        let dispatched = self.dispatch_envelope(envelope.clone()).await;
        Ok(EventHandle {
            event_id: envelope.id,
            dispatched,
        })
    }

    /// Mark a dead-lettered dispatch discarded.
    pub async fn discard(&self, failed_id: &str) -> Result<FailedEvent> {
        self.failed
            .set_status(failed_id, FailedEventStatus::Discarded)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_bus_config() -> BusConfig {
        BusConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        }
    }

    fn high_risk_event() -> DomainEvent {
        DomainEvent::HighRiskDetected {
            alert_id: "alert-1".to_string(),
            organization_id: "org-1".to_string(),
            risk_level: RiskLevel::Critical,
            urgency: 5,
        }
    }

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingHandler {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(Error::Handler("simulated failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_handlers() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed, &fast_bus_config());

        let handle = bus.publish(high_risk_event()).await.unwrap();
        assert_eq!(handle.dispatched, 0);
        assert!(handle.event_id.starts_with("evt-"));
    }

    #[tokio::test]
    async fn test_inline_dispatch_invokes_handler() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed.clone(), &fast_bus_config());

        let handler = CountingHandler::new(0);
        bus.register_handler(
            EVENT_HIGH_RISK_DETECTED,
            handler.clone(),
            HandlerOptions::default(),
        )
        .await;

        let handle = bus.publish(high_risk_event()).await.unwrap();
        assert_eq!(handle.dispatched, 1);
        assert_eq!(handler.calls(), 1);
        assert_eq!(failed.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed.clone(), &fast_bus_config());

        let handler = CountingHandler::new(2);
        bus.register_handler(
            EVENT_HIGH_RISK_DETECTED,
            handler.clone(),
            HandlerOptions {
                retries: 3,
                concurrency_limit: 1,
            },
        )
        .await;

        bus.publish(high_risk_event()).await.unwrap();
        assert_eq!(handler.calls(), 3); // 2 failures + 1 success
        assert_eq!(failed.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter_exactly_once() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed.clone(), &fast_bus_config());

        let handler = CountingHandler::new(u32::MAX);
        bus.register_handler(
            EVENT_HIGH_RISK_DETECTED,
            handler.clone(),
            HandlerOptions {
                retries: 2,
                concurrency_limit: 1,
            },
        )
        .await;

        bus.publish(high_risk_event()).await.unwrap();

        // Initial attempt + 2 retries, then exactly one dead letter
        assert_eq!(handler.calls(), 3);
        assert_eq!(failed.count().await.unwrap(), 1);

        let records = bus.failed_events(10).await.unwrap();
        assert_eq!(records[0].event_name, EVENT_HIGH_RISK_DETECTED);
        assert_eq!(records[0].attempts, 3);
        assert_eq!(records[0].status, FailedEventStatus::PendingReview);

        // No further automatic retries
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test]
    async fn test_requeue_re_dispatches_and_marks_record() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed.clone(), &fast_bus_config());

        // Fails the first 3 calls (initial + 2 retries), then succeeds
        let handler = CountingHandler::new(3);
        bus.register_handler(
            EVENT_HIGH_RISK_DETECTED,
            handler.clone(),
            HandlerOptions {
                retries: 2,
                concurrency_limit: 1,
            },
        )
        .await;

        bus.publish(high_risk_event()).await.unwrap();
        let record_id = bus.failed_events(1).await.unwrap()[0].id.clone();

        let handle = bus.requeue(&record_id).await.unwrap();
        assert_eq!(handle.dispatched, 1);
        assert_eq!(handler.calls(), 4);

        let record = failed.get(&record_id).await.unwrap().unwrap();
        assert_eq!(record.status, FailedEventStatus::Requeued);
    }

    #[tokio::test]
    async fn test_discard_marks_record() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed.clone(), &fast_bus_config());

        let handler = CountingHandler::new(u32::MAX);
        bus.register_handler(
            EVENT_HIGH_RISK_DETECTED,
            handler,
            HandlerOptions {
                retries: 0,
                concurrency_limit: 1,
            },
        )
        .await;

        bus.publish(high_risk_event()).await.unwrap();
        let record_id = bus.failed_events(1).await.unwrap()[0].id.clone();

        let record = bus.discard(&record_id).await.unwrap();
        assert_eq!(record.status, FailedEventStatus::Discarded);
    }

    #[tokio::test]
    async fn test_deferred_dispatch_runs_on_workers() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::deferred(failed.clone(), &fast_bus_config());
        assert_eq!(bus.mode(), "deferred");

        let handler = CountingHandler::new(0);
        bus.register_handler(
            EVENT_HIGH_RISK_DETECTED,
            handler.clone(),
            HandlerOptions::default(),
        )
        .await;

        bus.publish(high_risk_event()).await.unwrap();

        // Workers run out-of-band; wait for the dispatch to land
        for _ in 0..50 {
            if handler.calls() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_recent_events_backlog() {
        let failed = Arc::new(MemoryFailedEventStore::new());
        let bus = EventBus::inline(failed, &fast_bus_config());

        for _ in 0..3 {
            bus.publish(high_risk_event()).await.unwrap();
        }

        let recent = bus.recent_events(2).await;
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(high_risk_event().name(), "user/high-risk-detected");
        let ack = DomainEvent::AlertAcknowledged {
            alert_id: "a".to_string(),
            organization_id: "o".to_string(),
            acknowledged_by: "s".to_string(),
        };
        assert_eq!(ack.name(), "alert-acknowledged");
        assert_eq!(ack.alert_id(), Some("a"));
        let chat = DomainEvent::ChatMessageSent {
            subject_user_id: "u".to_string(),
            organization_id: "o".to_string(),
            risk_level: RiskLevel::Minimal,
        };
        assert_eq!(chat.name(), "chat/message-sent");
        assert_eq!(chat.alert_id(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = high_risk_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"high_risk_detected\""));
        assert!(json.contains("\"alertId\":\"alert-1\""));
        assert!(json.contains("\"riskLevel\":\"critical\""));

        let parsed: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name(), EVENT_HIGH_RISK_DETECTED);
    }
}
