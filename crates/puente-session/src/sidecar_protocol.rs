//! JSON frames exchanged with the WhatsApp session sidecar.
//!
//! The sidecar hosts the WhatsApp Web session and speaks one JSON object
//! per WebSocket text frame, tagged by `type`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session_events::{ConnectionUpdate, ImageMessage, InboundMessage};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
/// Frames the sidecar sends to the bridge.
pub enum SidecarInboundFrame {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),
    #[serde(rename = "creds.update")]
    CredsUpdate { creds: Value },
    #[serde(rename = "messages.upsert")]
    MessagesUpsert {
        #[serde(default)]
        messages: Vec<InboundMessage>,
    },
    #[serde(rename = "send.result", rename_all = "camelCase")]
    SendResult {
        request_id: String,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "media.result", rename_all = "camelCase")]
    MediaResult {
        request_id: String,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
/// Frames the bridge sends to the sidecar.
pub enum SidecarOutboundFrame {
    #[serde(rename = "hello")]
    Hello { creds: Option<Value> },
    #[serde(rename = "send", rename_all = "camelCase")]
    Send {
        request_id: String,
        to: String,
        text: String,
    },
    #[serde(rename = "media.download", rename_all = "camelCase")]
    MediaDownload {
        request_id: String,
        image_message: ImageMessage,
    },
}

pub fn parse_sidecar_frame(raw: &str) -> Result<SidecarInboundFrame> {
    serde_json::from_str::<SidecarInboundFrame>(raw).context("failed to parse sidecar frame")
}

pub fn encode_sidecar_frame(frame: &SidecarOutboundFrame) -> Result<String> {
    serde_json::to_string(frame).context("failed to encode sidecar frame")
}
