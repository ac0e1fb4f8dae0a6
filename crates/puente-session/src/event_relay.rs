//! Bridges session traffic in both directions.
//!
//! Inbound: a received message is normalized into a [`WebhookPayload`] and
//! handed to the [`BackoffSender`]. Outbound: text requested over HTTP goes
//! through the session provider, but only while the [`ConnectionGate`] is
//! connected.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use puente_delivery::{BackoffSender, DeliveryOutcome, QueuedEventId, WebhookPayload};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::connection_gate::{ConnectionGate, GateTransition};
use crate::session_events::{ConnectionUpdate, ImageMessage, InboundMessage};
use crate::session_provider::SessionProvider;

/// Largest image forwarded to the webhook, in bytes.
pub const MAX_INBOUND_IMAGE_BYTES: usize = 16_000_000;
pub const IMAGE_DEFAULT_TEXT: &str = "Imagen enviada";
pub const IMAGE_TOO_LARGE_MARKER: &str = " [Imagen muy grande, no procesada]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundSkip {
    /// The update carried no message body (protocol or receipt updates).
    NoContent,
    FromSelf,
    /// Neither text nor an attachment survived normalization.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Final disposition of one inbound message.
pub enum InboundDisposition {
    Skipped(InboundSkip),
    Delivered { attempts: u32 },
    Spilled(QueuedEventId),
    /// Delivery failed and the spill write failed too.
    Lost(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboundError {
    #[error("missing required fields numero and texto")]
    Validation,
    #[error("whatsapp session is disconnected")]
    Disconnected,
    #[error("{0}")]
    SendFailed(String),
}

#[derive(Clone)]
/// Public struct `EventRelay` used by the session supervisor and HTTP gateway.
pub struct EventRelay {
    sender: BackoffSender,
    gate: ConnectionGate,
    provider: Arc<dyn SessionProvider>,
}

impl EventRelay {
    pub fn new(
        sender: BackoffSender,
        gate: ConnectionGate,
        provider: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            sender,
            gate,
            provider,
        }
    }

    pub fn gate(&self) -> &ConnectionGate {
        &self.gate
    }

    /// Connection updates from the provider are the only input that moves the gate.
    pub fn apply_connection_update(&self, update: &ConnectionUpdate) -> GateTransition {
        self.gate.apply_update(update)
    }

    /// Runs [`EventRelay::relay_inbound`] on its own task inside `tasks`.
    pub fn spawn_inbound(&self, tasks: &mut JoinSet<InboundDisposition>, message: InboundMessage) {
        let relay = self.clone();
        tasks.spawn(async move { relay.relay_inbound(&message).await });
    }

    pub async fn relay_inbound(&self, message: &InboundMessage) -> InboundDisposition {
        let payload = match self.normalize_inbound(message).await {
            Ok(payload) => payload,
            Err(skip) => {
                tracing::debug!(
                    remitente = %message.sender_jid(),
                    reason = ?skip,
                    "inbound message skipped"
                );
                return InboundDisposition::Skipped(skip);
            }
        };
        tracing::info!(
            remitente = %payload.remitente,
            has_image = payload.has_image(),
            "relaying inbound message"
        );
        match self.sender.deliver(&payload).await {
            Ok(DeliveryOutcome::Delivered { attempts }) => InboundDisposition::Delivered { attempts },
            Ok(DeliveryOutcome::Spilled(queued)) => InboundDisposition::Spilled(queued.id),
            Err(error) => {
                tracing::error!(
                    remitente = %payload.remitente,
                    error = %error,
                    "inbound message could not be delivered or queued"
                );
                InboundDisposition::Lost(error.to_string())
            }
        }
    }

    /// Builds the webhook payload for `message`, downloading an attached image.
    pub async fn normalize_inbound(
        &self,
        message: &InboundMessage,
    ) -> Result<WebhookPayload, InboundSkip> {
        let Some(content) = message.message.as_ref() else {
            return Err(InboundSkip::NoContent);
        };
        if message.key.from_me {
            return Err(InboundSkip::FromSelf);
        }

        let mut text = content.text_body();
        let mut image = None;
        if let Some(image_message) = content.image_message.as_ref() {
            text = image_message
                .caption
                .clone()
                .filter(|caption| !caption.is_empty())
                .unwrap_or_else(|| IMAGE_DEFAULT_TEXT.to_string());
            if let Some(bytes) = self.fetch_image(image_message).await {
                let (annotated, encoded) = attach_image_bytes(text, &bytes);
                text = annotated;
                image = encoded;
            }
        }

        if text.is_empty() && image.is_none() {
            return Err(InboundSkip::Empty);
        }
        Ok(WebhookPayload {
            remitente: message.sender_jid().to_string(),
            contenido: text,
            imagen: image,
        })
    }

    async fn fetch_image(&self, image_message: &ImageMessage) -> Option<Vec<u8>> {
        match self.provider.download_image(image_message).await {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                tracing::error!(error = %error, "failed to download inbound image");
                None
            }
        }
    }

    /// Sends `texto` to `numero` through the live session.
    ///
    /// Checks run in order: required fields, connection, then exactly one
    /// provider call.
    pub async fn send_outbound(&self, numero: &str, texto: &str) -> Result<(), OutboundError> {
        // Whitespace-only fields count as missing (DESIGN.md, open question decisions).
        if numero.trim().is_empty() || texto.trim().is_empty() {
            return Err(OutboundError::Validation);
        }
        if !self.gate.is_connected() {
            tracing::warn!(numero, "outbound send rejected while disconnected");
            return Err(OutboundError::Disconnected);
        }
        match self.provider.send_text(numero, texto).await {
            Ok(()) => {
                tracing::info!(numero, "outbound message sent");
                Ok(())
            }
            Err(error) => {
                tracing::error!(numero, error = %error, "outbound send failed");
                Err(OutboundError::SendFailed(error.to_string()))
            }
        }
    }
}

/// Applies the size limit to downloaded image bytes.
///
/// Returns the possibly annotated text and the base64 attachment, if kept.
pub fn attach_image_bytes(text: String, bytes: &[u8]) -> (String, Option<String>) {
    if bytes.len() > MAX_INBOUND_IMAGE_BYTES {
        tracing::warn!(
            size_bytes = bytes.len(),
            limit_bytes = MAX_INBOUND_IMAGE_BYTES,
            "inbound image exceeds size limit; forwarding text only"
        );
        return (format!("{text}{IMAGE_TOO_LARGE_MARKER}"), None);
    }
    (text, Some(BASE64_STANDARD.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use puente_delivery::{DeliveryRetryPolicy, SpilloverStore};
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::session_events::{MessageContent, MessageKey};
    use crate::session_provider::SessionRequestError;
    use crate::test_support::{RecordingTransport, ScriptedProvider};

    struct Harness {
        relay: EventRelay,
        provider: Arc<ScriptedProvider>,
        transport: Arc<RecordingTransport>,
        store: Arc<SpilloverStore>,
        _temp: tempfile::TempDir,
    }

    fn harness(transport: RecordingTransport) -> Harness {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(SpilloverStore::open(temp.path().join("cola")).expect("store"));
        let transport = Arc::new(transport);
        let provider = Arc::new(ScriptedProvider::default());
        let sender = BackoffSender::new(
            transport.clone(),
            Arc::clone(&store),
            DeliveryRetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1_000),
            },
        );
        let relay = EventRelay::new(sender, ConnectionGate::default(), provider.clone());
        Harness {
            relay,
            provider,
            transport,
            store,
            _temp: temp,
        }
    }

    fn text_message(text: &str) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: Some("5215550001111@s.whatsapp.net".to_string()),
                from_me: false,
                id: Some("3EB0".to_string()),
            },
            message: Some(MessageContent {
                conversation: Some(text.to_string()),
                ..MessageContent::default()
            }),
            push_name: None,
        }
    }

    fn image_message(caption: Option<&str>) -> InboundMessage {
        let mut message = text_message("");
        message.message = Some(MessageContent {
            image_message: Some(ImageMessage {
                caption: caption.map(str::to_string),
                mimetype: Some("image/jpeg".to_string()),
                extra: serde_json::from_value(json!({"mediaKey": "a2V5"})).expect("extra"),
            }),
            ..MessageContent::default()
        });
        message
    }

    #[tokio::test]
    async fn functional_text_message_is_delivered_as_webhook_payload() {
        let h = harness(RecordingTransport::healthy());

        let disposition = h.relay.relay_inbound(&text_message("hola")).await;

        assert_eq!(disposition, InboundDisposition::Delivered { attempts: 1 });
        assert_eq!(
            h.transport.payloads(),
            vec![WebhookPayload::text("5215550001111@s.whatsapp.net", "hola")]
        );
    }

    #[tokio::test]
    async fn unit_own_and_empty_messages_are_skipped_without_delivery() {
        let h = harness(RecordingTransport::healthy());

        let mut own = text_message("eco");
        own.key.from_me = true;
        let mut bodyless = text_message("");
        bodyless.message = None;

        assert_eq!(
            h.relay.relay_inbound(&own).await,
            InboundDisposition::Skipped(InboundSkip::FromSelf)
        );
        assert_eq!(
            h.relay.relay_inbound(&bodyless).await,
            InboundDisposition::Skipped(InboundSkip::NoContent)
        );
        assert_eq!(
            h.relay.relay_inbound(&text_message("")).await,
            InboundDisposition::Skipped(InboundSkip::Empty)
        );
        assert!(h.transport.payloads().is_empty());
    }

    #[tokio::test]
    async fn functional_small_image_is_attached_with_default_text() {
        let h = harness(RecordingTransport::healthy());
        h.provider.set_download_result(Ok(vec![0x89, 0x50, 0x4e, 0x47]));

        let payload = h
            .relay
            .normalize_inbound(&image_message(None))
            .await
            .expect("payload");

        assert_eq!(payload.contenido, IMAGE_DEFAULT_TEXT);
        assert_eq!(payload.imagen.as_deref(), Some("iVBORw=="));
    }

    #[tokio::test]
    async fn functional_oversized_image_is_delivered_as_marked_text_only() {
        let h = harness(RecordingTransport::healthy());
        h.provider
            .set_download_result(Ok(vec![0_u8; 17 * 1024 * 1024]));

        let disposition = h.relay.relay_inbound(&image_message(Some("factura"))).await;

        assert_eq!(disposition, InboundDisposition::Delivered { attempts: 1 });
        let payloads = h.transport.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0].contenido,
            "factura [Imagen muy grande, no procesada]"
        );
        assert_eq!(payloads[0].imagen, None);
    }

    #[tokio::test]
    async fn regression_failed_image_download_still_forwards_caption() {
        let h = harness(RecordingTransport::healthy());
        h.provider.set_download_result(Err(SessionRequestError::Transport(
            "media expired".to_string(),
        )));

        let payload = h
            .relay
            .normalize_inbound(&image_message(Some("recibo")))
            .await
            .expect("payload");

        assert_eq!(payload.contenido, "recibo");
        assert_eq!(payload.imagen, None);
    }

    #[test]
    fn unit_attach_image_bytes_keeps_images_at_the_limit() {
        let (text, image) = attach_image_bytes("x".to_string(), &vec![1_u8; MAX_INBOUND_IMAGE_BYTES]);
        assert_eq!(text, "x");
        assert!(image.is_some());

        let (text, image) =
            attach_image_bytes("x".to_string(), &vec![1_u8; MAX_INBOUND_IMAGE_BYTES + 1]);
        assert_eq!(text, format!("x{IMAGE_TOO_LARGE_MARKER}"));
        assert!(image.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_unreachable_endpoint_spills_inbound_message() {
        let h = harness(RecordingTransport::failing());

        let disposition = h.relay.relay_inbound(&text_message("urgente")).await;

        assert!(matches!(disposition, InboundDisposition::Spilled(_)));
        assert_eq!(h.transport.payloads().len(), 3);
        assert_eq!(h.store.pending_count().expect("count"), 1);
    }

    #[tokio::test]
    async fn functional_send_outbound_while_disconnected_never_calls_provider() {
        let h = harness(RecordingTransport::healthy());

        let error = h
            .relay
            .send_outbound("5215550001111", "hola")
            .await
            .expect_err("disconnected");

        assert_eq!(error, OutboundError::Disconnected);
        assert!(h.provider.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn unit_send_outbound_validates_fields_before_connection() {
        let h = harness(RecordingTransport::healthy());
        assert_eq!(
            h.relay.send_outbound("", "hola").await,
            Err(OutboundError::Validation)
        );
        assert_eq!(
            h.relay.send_outbound("5215550001111", "  ").await,
            Err(OutboundError::Validation)
        );
    }

    #[tokio::test]
    async fn functional_send_outbound_uses_provider_once_when_connected() {
        let h = harness(RecordingTransport::healthy());
        h.relay.apply_connection_update(&ConnectionUpdate::open());

        h.relay
            .send_outbound("5215550001111@s.whatsapp.net", "tu pedido salió")
            .await
            .expect("send");

        assert_eq!(
            h.provider.sent_messages(),
            vec![(
                "5215550001111@s.whatsapp.net".to_string(),
                "tu pedido salió".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn regression_provider_failure_surfaces_as_send_failed() {
        let h = harness(RecordingTransport::healthy());
        h.relay.apply_connection_update(&ConnectionUpdate::open());
        h.provider
            .set_send_error(Some(SessionRequestError::Rejected("not on whatsapp".to_string())));

        let error = h
            .relay
            .send_outbound("000", "hola")
            .await
            .expect_err("send should fail");

        match error {
            OutboundError::SendFailed(message) => assert!(message.contains("not on whatsapp")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(h.provider.sent_messages().len(), 1);
    }
}
