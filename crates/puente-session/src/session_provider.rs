use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session_events::{ImageMessage, SessionEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Failures of a single request made through a live session.
pub enum SessionRequestError {
    #[error("session provider is not connected")]
    NotConnected,
    #[error("session provider rejected the request: {0}")]
    Rejected(String),
    #[error("session provider did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("session provider transport failed: {0}")]
    Transport(String),
}

#[async_trait]
/// Trait contract for the WhatsApp session library.
///
/// `connect` starts one session and returns its event stream. The stream
/// ending means the session is gone and the caller decides whether to
/// reconnect.
pub trait SessionProvider: Send + Sync {
    async fn connect(&self, credentials: Option<Value>) -> Result<mpsc::Receiver<SessionEvent>>;

    async fn send_text(&self, to: &str, text: &str) -> Result<(), SessionRequestError>;

    async fn download_image(&self, image: &ImageMessage) -> Result<Vec<u8>, SessionRequestError>;
}
