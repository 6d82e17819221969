//! Dispatch execution: retry loop and deferred worker pool
//!
//! Inline and deferred modes share one dispatch routine: run the handler
//! under its concurrency permit, retry with exponential backoff on
//! error, and dead-letter the envelope once the budget is exhausted.

use crate::bus::failed::{FailedEvent, FailedEventStore};
use crate::bus::{EventEnvelope, RegisteredHandler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Backoff policy for handler retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt number `attempt`
    /// (0-indexed).
    ///
    /// Exponential backoff `base * 2^attempt` capped at `max_delay_ms`,
    /// with deterministic jitter of up to ±25% so synchronized failures
    /// do not retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let capped = exp_delay.min(self.max_delay_ms);

        let jitter_range = capped / 4;
        let jitter = if jitter_range > 0 {
            let jitter_offset = (u64::from(attempt) * 7 + 3) % (jitter_range * 2 + 1);
            capped - jitter_range + jitter_offset
        } else {
            capped
        };

        Duration::from_millis(jitter)
    }
}

/// One queued dispatch: an envelope bound to one registered handler.
pub(crate) struct DispatchJob {
    pub envelope: EventEnvelope,
    pub handler: RegisteredHandler,
}

/// Run one dispatch to completion: retries, then dead-letter.
///
/// Handler failures never propagate to the publisher; after the retry
/// budget is exhausted exactly one `FailedEvent` is recorded.
pub(crate) async fn run_dispatch(
    envelope: EventEnvelope,
    registered: RegisteredHandler,
    failed: Arc<dyn FailedEventStore>,
    retry: RetryPolicy,
) {
    let _permit = registered.permits.clone().acquire_owned().await.ok();

    let mut attempts: u32 = 0;
    let mut first_failed_at: Option<i64> = None;

    loop {
        attempts += 1;
        match registered.handler.handle(&envelope.event).await {
            Ok(()) => {
                if attempts > 1 {
                    tracing::info!(
                        event_id = %envelope.id,
                        handler = %registered.id,
                        attempts,
                        "Handler succeeded after retries"
                    );
                }
                return;
            }
            Err(e) => {
                let now = chrono::Utc::now().timestamp_millis();
                first_failed_at.get_or_insert(now);

                if attempts > registered.options.retries {
                    tracing::error!(
                        event_id = %envelope.id,
                        event_name = %envelope.event.name(),
                        handler = %registered.id,
                        attempts,
                        error = %e,
                        "Handler retry budget exhausted, dead-lettering"
                    );
                    let payload =
                        serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null);
                    let record = FailedEvent::new(
                        envelope.event.name(),
                        payload,
                        e.to_string(),
                        attempts,
                        first_failed_at.unwrap_or(now),
                    );
                    if let Err(store_err) = failed.record(record).await {
                        tracing::error!(
                            event_id = %envelope.id,
                            error = %store_err,
                            "Failed to persist dead-letter record"
                        );
                    }
                    return;
                }

                let delay = retry.delay_for_attempt(attempts - 1);
                tracing::warn!(
                    event_id = %envelope.id,
                    handler = %registered.id,
                    attempt = attempts,
                    error = %e,
                    "Handler failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Spawn the deferred-mode worker pool over a shared job queue.
pub(crate) fn spawn_workers(
    worker_count: usize,
    rx: mpsc::UnboundedReceiver<DispatchJob>,
    failed: Arc<dyn FailedEventStore>,
    retry: RetryPolicy,
) {
    let rx = Arc::new(Mutex::new(rx));
    for worker in 0..worker_count.max(1) {
        let rx = Arc::clone(&rx);
        let failed = Arc::clone(&failed);
        tokio::spawn(async move {
            loop {
                let job = { rx.lock().await.recv().await };
                match job {
                    Some(job) => {
                        run_dispatch(job.envelope, job.handler, Arc::clone(&failed), retry).await;
                    }
                    None => {
                        tracing::debug!(worker, "Dispatch worker stopped");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_exponential_growth() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        };

        let d0 = policy.delay_for_attempt(0);
        assert!(d0.as_millis() >= 750 && d0.as_millis() <= 1_250);

        let d1 = policy.delay_for_attempt(1);
        assert!(d1.as_millis() >= 1_500 && d1.as_millis() <= 2_500);

        let d2 = policy.delay_for_attempt(2);
        assert!(d2.as_millis() >= 3_000 && d2.as_millis() <= 5_000);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
        };
        let d = policy.delay_for_attempt(10);
        assert!(d.as_millis() <= 6_250); // cap + 25% jitter
    }

    #[test]
    fn test_delay_zero_base() {
        let policy = RetryPolicy {
            base_delay_ms: 0,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for_attempt(0).as_millis(), 0);
    }
}
