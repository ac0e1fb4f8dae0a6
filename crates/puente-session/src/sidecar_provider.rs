//! [`SessionProvider`] backed by the session sidecar over WebSocket.
//!
//! One socket carries one session. A writer task drains outgoing frames, a
//! reader task turns incoming frames into [`SessionEvent`]s and resolves
//! pending requests by `requestId`. When the socket goes away every pending
//! request fails and a synthetic `close` update is emitted so the supervisor
//! reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use futures_util::{SinkExt, Stream, StreamExt};
use puente_core::current_unix_timestamp_ms;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::session_events::{ConnectionUpdate, ImageMessage, SessionEvent};
use crate::session_provider::{SessionProvider, SessionRequestError};
use crate::sidecar_protocol::{
    encode_sidecar_frame, parse_sidecar_frame, SidecarInboundFrame, SidecarOutboundFrame,
};

pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:9100/session";
pub const DEFAULT_SIDECAR_REQUEST_TIMEOUT_MS: u64 = 30_000;
const SESSION_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarProviderConfig {
    pub url: String,
    pub request_timeout: Duration,
}

impl SidecarProviderConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_millis(DEFAULT_SIDECAR_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug)]
enum SidecarReply {
    Send { ok: bool, error: Option<String> },
    Media { data: Option<String>, error: Option<String> },
}

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<SidecarReply>>>>;

#[derive(Clone)]
struct SidecarLink {
    generation: u64,
    outbound_tx: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
}

/// Public struct `WsSidecarProvider` talking to the session sidecar.
pub struct WsSidecarProvider {
    config: SidecarProviderConfig,
    link: Arc<Mutex<Option<SidecarLink>>>,
    next_generation: AtomicU64,
    next_request: AtomicU64,
}

impl WsSidecarProvider {
    pub fn new(config: SidecarProviderConfig) -> Self {
        Self {
            config,
            link: Arc::new(Mutex::new(None)),
            next_generation: AtomicU64::new(0),
            next_request: AtomicU64::new(0),
        }
    }

    fn next_request_id(&self) -> String {
        let sequence = self.next_request.fetch_add(1, Ordering::Relaxed);
        format!("puente-{}-{sequence}", current_unix_timestamp_ms())
    }

    async fn request(
        &self,
        build_frame: impl FnOnce(String) -> SidecarOutboundFrame,
    ) -> Result<SidecarReply, SessionRequestError> {
        let link = lock_or_recover(&self.link)
            .clone()
            .ok_or(SessionRequestError::NotConnected)?;
        let request_id = self.next_request_id();
        let frame = encode_sidecar_frame(&build_frame(request_id.clone()))
            .map_err(|error| SessionRequestError::Transport(format!("{error:#}")))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        lock_or_recover(&link.pending).insert(request_id.clone(), reply_tx);
        if link.outbound_tx.send(frame).is_err() {
            lock_or_recover(&link.pending).remove(&request_id);
            return Err(SessionRequestError::Transport(
                "sidecar connection closed".to_string(),
            ));
        }

        match tokio::time::timeout(self.config.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SessionRequestError::Transport(
                "sidecar connection closed before replying".to_string(),
            )),
            Err(_) => {
                lock_or_recover(&link.pending).remove(&request_id);
                Err(SessionRequestError::Timeout {
                    timeout_ms: u64::try_from(self.config.request_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }
}

#[async_trait]
impl SessionProvider for WsSidecarProvider {
    async fn connect(&self, credentials: Option<Value>) -> Result<mpsc::Receiver<SessionEvent>> {
        let (stream, _response) = connect_async(self.config.url.as_str())
            .await
            .with_context(|| format!("failed to connect session sidecar at {}", self.config.url))?;
        let (mut sink, source) = stream.split();

        let hello = encode_sidecar_frame(&SidecarOutboundFrame::Hello { creds: credentials })?;
        sink.send(WsMessage::Text(hello.into()))
            .await
            .context("failed to send sidecar hello frame")?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let pending = PendingReplies::default();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        *lock_or_recover(&self.link) = Some(SidecarLink {
            generation,
            outbound_tx,
            pending: Arc::clone(&pending),
        });
        tracing::info!(url = %self.config.url, generation, "session sidecar connected");

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(error) = sink.send(WsMessage::Text(frame.into())).await {
                    tracing::warn!(error = %error, "failed to write sidecar frame");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        tokio::spawn(run_sidecar_reader(
            source,
            events_tx,
            pending,
            Arc::clone(&self.link),
            generation,
        ));
        Ok(events_rx)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), SessionRequestError> {
        let reply = self
            .request(|request_id| SidecarOutboundFrame::Send {
                request_id,
                to: to.to_string(),
                text: text.to_string(),
            })
            .await?;
        match reply {
            SidecarReply::Send { ok: true, .. } => Ok(()),
            SidecarReply::Send { ok: false, error } => Err(SessionRequestError::Rejected(
                error.unwrap_or_else(|| "send rejected by sidecar".to_string()),
            )),
            SidecarReply::Media { .. } => Err(SessionRequestError::Transport(
                "sidecar answered a send with a media result".to_string(),
            )),
        }
    }

    async fn download_image(&self, image: &ImageMessage) -> Result<Vec<u8>, SessionRequestError> {
        let reply = self
            .request(|request_id| SidecarOutboundFrame::MediaDownload {
                request_id,
                image_message: image.clone(),
            })
            .await?;
        match reply {
            SidecarReply::Media {
                data: Some(data), ..
            } => BASE64_STANDARD.decode(data.as_bytes()).map_err(|error| {
                SessionRequestError::Transport(format!("sidecar media is not valid base64: {error}"))
            }),
            SidecarReply::Media { data: None, error } => Err(SessionRequestError::Rejected(
                error.unwrap_or_else(|| "media download failed".to_string()),
            )),
            SidecarReply::Send { .. } => Err(SessionRequestError::Transport(
                "sidecar answered a media download with a send result".to_string(),
            )),
        }
    }
}

async fn run_sidecar_reader<S>(
    mut source: S,
    events_tx: mpsc::Sender<SessionEvent>,
    pending: PendingReplies,
    link: Arc<Mutex<Option<SidecarLink>>>,
    generation: u64,
) where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let close_reason = loop {
        let Some(message) = source.next().await else {
            break Some("sidecar closed the socket".to_string());
        };
        let text = match message {
            Ok(WsMessage::Text(text)) => text.as_str().to_string(),
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("skipping non-UTF-8 sidecar frame");
                    continue;
                }
            },
            Ok(WsMessage::Close(_)) => break Some("sidecar sent a close frame".to_string()),
            Ok(_) => continue,
            Err(error) => break Some(format!("sidecar socket error: {error}")),
        };
        let frame = match parse_sidecar_frame(&text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "skipping malformed sidecar frame");
                continue;
            }
        };
        if !dispatch_frame(frame, &events_tx, &pending).await {
            break None;
        }
    };

    lock_or_recover(&pending).clear();
    {
        let mut current = lock_or_recover(&link);
        if current
            .as_ref()
            .is_some_and(|active| active.generation == generation)
        {
            *current = None;
        }
    }

    match close_reason {
        Some(reason) => {
            tracing::warn!(generation, reason = %reason, "session sidecar disconnected");
            let _ = events_tx
                .send(SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(
                    None,
                    Some(reason),
                )))
                .await;
        }
        None => tracing::debug!(generation, "session event consumer went away"),
    }
}

/// Routes one frame; returns `false` once nobody consumes session events.
async fn dispatch_frame(
    frame: SidecarInboundFrame,
    events_tx: &mpsc::Sender<SessionEvent>,
    pending: &PendingReplies,
) -> bool {
    match frame {
        SidecarInboundFrame::ConnectionUpdate(update) => events_tx
            .send(SessionEvent::ConnectionUpdate(update))
            .await
            .is_ok(),
        SidecarInboundFrame::CredsUpdate { creds } => events_tx
            .send(SessionEvent::CredentialsUpdated(creds))
            .await
            .is_ok(),
        SidecarInboundFrame::MessagesUpsert { messages } => {
            for message in messages {
                if events_tx
                    .send(SessionEvent::MessageReceived(message))
                    .await
                    .is_err()
                {
                    return false;
                }
            }
            true
        }
        SidecarInboundFrame::SendResult {
            request_id,
            ok,
            error,
        } => {
            resolve_pending(pending, &request_id, SidecarReply::Send { ok, error });
            true
        }
        SidecarInboundFrame::MediaResult {
            request_id,
            data,
            error,
        } => {
            resolve_pending(pending, &request_id, SidecarReply::Media { data, error });
            true
        }
    }
}

fn resolve_pending(pending: &PendingReplies, request_id: &str, reply: SidecarReply) {
    let waiter = lock_or_recover(pending).remove(request_id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(reply);
        }
        None => tracing::debug!(request_id, "sidecar reply for unknown or expired request"),
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
