use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use puente_delivery::{TransportFailure, WebhookPayload, WebhookTransport};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::session_events::{ImageMessage, SessionEvent};
use crate::session_provider::{SessionProvider, SessionRequestError};

/// Webhook transport that records payloads and answers with a fixed outcome.
pub(crate) struct RecordingTransport {
    healthy: bool,
    payloads: Mutex<Vec<WebhookPayload>>,
}

impl RecordingTransport {
    pub(crate) fn healthy() -> Self {
        Self {
            healthy: true,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            healthy: false,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn payloads(&self) -> Vec<WebhookPayload> {
        self.payloads.lock().expect("payloads lock").clone()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post_payload(&self, payload: &WebhookPayload) -> Result<(), TransportFailure> {
        self.payloads
            .lock()
            .expect("payloads lock")
            .push(payload.clone());
        if self.healthy {
            Ok(())
        } else {
            Err(TransportFailure::Status {
                status: 502,
                body: "bad gateway".to_string(),
            })
        }
    }
}

/// Session provider driven by the test.
///
/// Each `connect` pops the next scripted result; once the script is empty a
/// connect succeeds with no initial events. The sender of every opened
/// stream is kept so tests can push events later or end the stream.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    connect_script: Mutex<VecDeque<Result<Vec<SessionEvent>, String>>>,
    connects: Mutex<Vec<(Instant, Option<Value>)>>,
    live_streams: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    sent: Mutex<Vec<(String, String)>>,
    send_error: Mutex<Option<SessionRequestError>>,
    download_result: Mutex<Option<Result<Vec<u8>, SessionRequestError>>>,
}

impl ScriptedProvider {
    pub(crate) fn script_connect(&self, result: Result<Vec<SessionEvent>, String>) {
        self.connect_script
            .lock()
            .expect("script lock")
            .push_back(result);
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.lock().expect("connects lock").len()
    }

    pub(crate) fn connect_instants(&self) -> Vec<Instant> {
        self.connects
            .lock()
            .expect("connects lock")
            .iter()
            .map(|(instant, _)| *instant)
            .collect()
    }

    pub(crate) fn connect_credentials(&self) -> Vec<Option<Value>> {
        self.connects
            .lock()
            .expect("connects lock")
            .iter()
            .map(|(_, credentials)| credentials.clone())
            .collect()
    }

    pub(crate) async fn push_event(&self, event: SessionEvent) {
        let sender = self
            .live_streams
            .lock()
            .expect("streams lock")
            .last()
            .cloned()
            .expect("an open stream");
        sender.send(event).await.expect("stream receiver alive");
    }

    /// Drops every stream sender so the consumer sees the stream end.
    pub(crate) fn end_streams(&self) {
        self.live_streams.lock().expect("streams lock").clear();
    }

    pub(crate) fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn set_send_error(&self, error: Option<SessionRequestError>) {
        *self.send_error.lock().expect("send error lock") = error;
    }

    pub(crate) fn set_download_result(&self, result: Result<Vec<u8>, SessionRequestError>) {
        *self.download_result.lock().expect("download lock") = Some(result);
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn connect(&self, credentials: Option<Value>) -> Result<mpsc::Receiver<SessionEvent>> {
        self.connects
            .lock()
            .expect("connects lock")
            .push((Instant::now(), credentials));
        let scripted = self
            .connect_script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        let events = scripted.map_err(|message| anyhow!(message))?;

        let (sender, receiver) = mpsc::channel(64);
        for event in events {
            sender.try_send(event).expect("scripted events fit the channel");
        }
        self.live_streams
            .lock()
            .expect("streams lock")
            .push(sender);
        Ok(receiver)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), SessionRequestError> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((to.to_string(), text.to_string()));
        match self.send_error.lock().expect("send error lock").clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn download_image(&self, _image: &ImageMessage) -> Result<Vec<u8>, SessionRequestError> {
        self.download_result
            .lock()
            .expect("download lock")
            .clone()
            .unwrap_or_else(|| Err(SessionRequestError::Transport("no media scripted".to_string())))
    }
}
