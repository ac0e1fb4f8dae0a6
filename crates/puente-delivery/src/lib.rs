//! Reliable webhook delivery for the Puente relay.
//!
//! Inbound session events are turned into [`WebhookPayload`] values and pushed
//! to the remote endpoint by the [`BackoffSender`]. Payloads that exhaust the
//! bounded retry chain spill into the [`SpilloverStore`], a directory of one
//! JSON file per undelivered payload. The [`RequeueSweeper`] walks that
//! directory on a fixed interval (and whenever the session reconnects) and
//! removes every file whose payload finally got through.

pub mod backoff_sender;
pub mod delivery_retry;
pub mod requeue_sweeper;
pub mod spillover_store;
#[cfg(test)]
mod test_support;
pub mod webhook_payload;
pub mod webhook_transport;

pub use backoff_sender::{BackoffSender, ChainOutcome, DeliveryOutcome};
pub use delivery_retry::{
    DeliveryRetryPolicy, DEFAULT_BACKOFF_BASE_MS, DEFAULT_MAX_DELIVERY_ATTEMPTS,
};
pub use requeue_sweeper::{
    start_requeue_scheduler, RequeueSchedulerConfig, RequeueSchedulerHandle, RequeueSweeper,
    RequeueTrigger, SweepReport, DEFAULT_REQUEUE_INTERVAL_SECONDS,
};
pub use spillover_store::{
    QueuedEvent, QueuedEventId, SpilloverError, SpilloverListing, SpilloverStore,
    UnreadableQueuedEvent, DEFAULT_SPOOL_DIR,
};
pub use webhook_payload::WebhookPayload;
pub use webhook_transport::{
    webhook_endpoint, HttpWebhookTransport, TransportFailure, WebhookTransport,
    WebhookTransportConfig, DEFAULT_WEBHOOK_TIMEOUT_MS,
};
