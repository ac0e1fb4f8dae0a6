//! Bounded retry chain in front of the webhook transport.
//!
//! [`BackoffSender::deliver`] is the entry point for fresh payloads: it runs
//! the chain and spills the payload to the [`SpilloverStore`] when every
//! attempt failed. [`BackoffSender::run_chain`] runs the same chain without
//! spilling and is what the requeue sweep uses for payloads already on disk.

use std::sync::Arc;

use crate::delivery_retry::DeliveryRetryPolicy;
use crate::spillover_store::{QueuedEvent, SpilloverError, SpilloverStore};
use crate::webhook_payload::WebhookPayload;
use crate::webhook_transport::WebhookTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of one retry chain.
pub enum ChainOutcome {
    Delivered { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

impl ChainOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Terminal outcome of [`BackoffSender::deliver`].
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Every attempt failed; the payload now lives in the spillover store.
    Spilled(QueuedEvent),
}

#[derive(Clone)]
/// Public struct `BackoffSender` shared by the inbound relay and the sweeper.
pub struct BackoffSender {
    transport: Arc<dyn WebhookTransport>,
    store: Arc<SpilloverStore>,
    policy: DeliveryRetryPolicy,
}

impl BackoffSender {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        store: Arc<SpilloverStore>,
        policy: DeliveryRetryPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<SpilloverStore> {
        &self.store
    }

    /// Delivers `payload`, spilling it to disk once the retry budget is spent.
    ///
    /// Only a failed spill write is an error; delivery failures never are.
    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<DeliveryOutcome, SpilloverError> {
        match self.run_chain(payload).await {
            ChainOutcome::Delivered { attempts } => Ok(DeliveryOutcome::Delivered { attempts }),
            ChainOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    remitente = %payload.remitente,
                    attempts,
                    last_error = %last_error,
                    "retry budget exhausted; spilling payload to local queue"
                );
                let store = Arc::clone(&self.store);
                let owned = payload.clone();
                let queued = tokio::task::spawn_blocking(move || store.enqueue(&owned))
                    .await
                    .map_err(|error| SpilloverError::Join(error.to_string()))??;
                Ok(DeliveryOutcome::Spilled(queued))
            }
        }
    }

    /// Runs the bounded attempt loop: attempt, wait `base * 2^attempt`, repeat.
    pub async fn run_chain(&self, payload: &WebhookPayload) -> ChainOutcome {
        let max_attempts = self.policy.effective_max_attempts();
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            match self.transport.post_payload(payload).await {
                Ok(()) => {
                    tracing::info!(
                        remitente = %payload.remitente,
                        attempt,
                        "payload delivered to server"
                    );
                    return ChainOutcome::Delivered { attempts: attempt };
                }
                Err(error) => {
                    tracing::error!(
                        remitente = %payload.remitente,
                        attempt,
                        max_attempts,
                        error = %error,
                        "webhook delivery attempt failed"
                    );
                    if !self.policy.allows_retry_after(attempt) {
                        return ChainOutcome::Exhausted {
                            attempts: attempt,
                            last_error: error.to_string(),
                        };
                    }
                    let delay = self.policy.delay_after_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying webhook delivery after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
