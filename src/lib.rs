//! # haven-alerts
//!
//! Crisis detection and real-time alert routing for the Haven wellness
//! platform.
//!
//! ## Overview
//!
//! `haven-alerts` screens every inbound user message for mental-health
//! crisis risk and routes time-critical alerts to the right subset of
//! staff — counselors scoped to the user's organization plus platform
//! administrators — while guaranteeing the alert is durably recorded
//! even when delivery or downstream processing fails.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use haven_alerts::{
//!     AlertManager, Classifier, CoreConfig, Dispatcher, EventBus,
//!     MemoryAlertStore, MemoryAuditStore, MemoryFailedEventStore,
//! };
//!
//! # async fn example() -> haven_alerts::Result<()> {
//! let config = CoreConfig::default();
//!
//! let bus = Arc::new(EventBus::inline(
//!     Arc::new(MemoryFailedEventStore::new()),
//!     &config.bus,
//! ));
//! let audit = Arc::new(MemoryAuditStore::new());
//! let manager = Arc::new(AlertManager::new(
//!     Arc::new(MemoryAlertStore::new()),
//!     audit.clone(),
//!     bus.clone(),
//!     config.dispatch.max_message_len,
//! ));
//! let classifier = Arc::new(Classifier::new(&config.classifier)?);
//!
//! let dispatcher = Dispatcher::new(
//!     classifier,
//!     manager.clone(),
//!     bus,
//!     audit,
//!     config.dispatch,
//! );
//!
//! let outcome = dispatcher
//!     .handle_message("user-1", "college-3", "I want to kill myself", &[])
//!     .await?;
//! assert!(outcome.alert_raised);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Classifier** — keyword heuristic plus bounded escalation to an
//!   external `InferenceClient`; always falls back to the heuristic.
//! - **EventBus** — typed domain events, inline or worker-pool dispatch,
//!   retry with backoff, dead-letter capture as `FailedEvent`.
//! - **AlertManager** — the active → acknowledged → resolved state
//!   machine over a pluggable `AlertStore`, with an append-only audit
//!   trail.
//! - **RealtimeRouter** — room-scoped fan-out to live staff connections;
//!   best-effort, never the system of record.
//! - **Dispatcher** — orchestrates the flow and isolates push failures
//!   from the durable write.

pub mod alert;
pub mod bus;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod realtime;

// Re-export core types
pub use alert::{
    mask_user_id, urgency_for, AlertManager, AlertPush, AlertStatus, AlertStore, AuditAction,
    AuditEntry, AuditStore, CrisisAlert, MemoryAlertStore, MemoryAuditStore, SYSTEM_ACTOR,
};
pub use bus::{
    DomainEvent, EventBus, EventEnvelope, EventHandle, EventHandler, FailedEvent,
    FailedEventStatus, FailedEventStore, HandlerOptions, MemoryFailedEventStore, RetryPolicy,
    EVENT_ALERT_ACKNOWLEDGED, EVENT_CHAT_MESSAGE_SENT, EVENT_HIGH_RISK_DETECTED,
};
pub use classify::{
    Classifier, InferenceClient, InferenceVerdict, RiskLevel, Verdict, METHOD_INFERENCE,
    METHOD_KEYWORD,
};
pub use config::{BusConfig, ClassifierConfig, CoreConfig, DispatchConfig, RealtimeConfig};
pub use dispatch::{
    fingerprint, register_broadcast_handlers, AcknowledgedHandler, BroadcastAlertHandler,
    DispatchOutcome, Dispatcher, PUSH_ALERT_ACKNOWLEDGED, PUSH_CRISIS_ALERT,
};
pub use error::{Error, Result};
pub use realtime::{
    org_room, user_room, ChannelSink, ConnectionSink, RealtimeRouter, RoomMessage, ADMIN_ROOM,
};
