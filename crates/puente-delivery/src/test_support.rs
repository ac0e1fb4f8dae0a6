use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::webhook_payload::WebhookPayload;
use crate::webhook_transport::{TransportFailure, WebhookTransport};

/// Transport that replays scripted outcomes and records every call.
///
/// Once the script runs out, `fallback_ok` decides the outcome of further calls.
pub(crate) struct ScriptedTransport {
    outcomes: Mutex<VecDeque<bool>>,
    fallback_ok: bool,
    calls: Mutex<Vec<(Instant, WebhookPayload)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(outcomes: Vec<bool>, fallback_ok: bool) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::from(outcomes)),
            fallback_ok,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always_ok() -> Self {
        Self::new(Vec::new(), true)
    }

    pub(crate) fn always_failing() -> Self {
        Self::new(Vec::new(), false)
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub(crate) fn call_instants(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(instant, _)| *instant)
            .collect()
    }

    pub(crate) fn delivered_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, payload)| payload.contenido.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post_payload(&self, payload: &WebhookPayload) -> Result<(), TransportFailure> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((Instant::now(), payload.clone()));
        let ok = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or(self.fallback_ok);
        if ok {
            Ok(())
        } else {
            Err(TransportFailure::Status {
                status: 503,
                body: "scripted outage".to_string(),
            })
        }
    }
}
