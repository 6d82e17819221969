//! Alert repository
//!
//! `AlertStore` is the durable system of record for crisis alerts.
//! Status transitions go through `transition`, a compare-and-swap that
//! runs under one write lock so concurrent claims on the same alert
//! serialize without global locking.

use crate::alert::{AlertStatus, CrisisAlert};
use crate::classify::RiskLevel;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable repository for crisis alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a new alert.
    async fn insert(&self, alert: CrisisAlert) -> Result<()>;

    /// Fetch one alert by id.
    async fn get(&self, alert_id: &str) -> Result<Option<CrisisAlert>>;

    /// Compare-and-swap the status of an alert.
    ///
    /// Fails with `Error::InvalidState` when the current status is not in
    /// `expected`; stamps the transition timestamp and actor for the new
    /// status. Returns the updated record.
    async fn transition(
        &self,
        alert_id: &str,
        expected: &[AlertStatus],
        next: AlertStatus,
        actor_id: &str,
        at: i64,
    ) -> Result<CrisisAlert>;

    /// All alerts for an organization that are not yet resolved,
    /// newest first.
    async fn list_active(&self, organization_id: &str) -> Result<Vec<CrisisAlert>>;

    /// Find an unresolved alert carrying the given idempotency fingerprint.
    async fn find_active_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<CrisisAlert>>;

    /// Alert counts grouped by risk level.
    async fn counts_by_level(&self) -> Result<HashMap<RiskLevel, u64>>;
}

/// In-memory alert store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Arc<RwLock<HashMap<String, CrisisAlert>>>,
}

impl MemoryAlertStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, alert: CrisisAlert) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        alerts.insert(alert.id.clone(), alert);
        Ok(())
    }

    async fn get(&self, alert_id: &str) -> Result<Option<CrisisAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.get(alert_id).cloned())
    }

    async fn transition(
        &self,
        alert_id: &str,
        expected: &[AlertStatus],
        next: AlertStatus,
        actor_id: &str,
        at: i64,
    ) -> Result<CrisisAlert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .get_mut(alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {}", alert_id)))?;

        if !expected.contains(&alert.status) {
            return Err(Error::InvalidState {
                alert_id: alert_id.to_string(),
                expected: expected
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join("|"),
                found: alert.status.as_str().to_string(),
            });
        }

        alert.status = next;
        match next {
            AlertStatus::Acknowledged => {
                alert.acknowledged_at = Some(at);
                alert.acknowledged_by = Some(actor_id.to_string());
            }
            AlertStatus::Resolved => {
                alert.resolved_at = Some(at);
                alert.resolved_by = Some(actor_id.to_string());
            }
            AlertStatus::Active => {}
        }

        Ok(alert.clone())
    }

    async fn list_active(&self, organization_id: &str) -> Result<Vec<CrisisAlert>> {
        let alerts = self.alerts.read().await;
        let mut active: Vec<CrisisAlert> = alerts
            .values()
            .filter(|a| a.organization_id == organization_id && a.status != AlertStatus::Resolved)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn find_active_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CrisisAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts
            .values()
            .find(|a| a.fingerprint == fingerprint && a.status != AlertStatus::Resolved)
            .cloned())
    }

    async fn counts_by_level(&self) -> Result<HashMap<RiskLevel, u64>> {
        let alerts = self.alerts.read().await;
        let mut counts = HashMap::new();
        for alert in alerts.values() {
            *counts.entry(alert.risk_level).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
