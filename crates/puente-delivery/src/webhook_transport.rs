//! HTTP transport for webhook delivery.
//!
//! One call is one attempt: the transport never retries on its own. Any
//! non-2xx status, connect error, or timeout is reported as a
//! [`TransportFailure`] and the backoff chain decides what happens next.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use thiserror::Error;

use crate::webhook_payload::WebhookPayload;

pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5_000;

const WEBHOOK_PATH: &str = "/webhook";
const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Error)]
/// Transient delivery failures; every variant is retried by the sender.
pub enum TransportFailure {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned non-success status {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
/// Trait contract for a single webhook delivery attempt.
pub trait WebhookTransport: Send + Sync {
    async fn post_payload(&self, payload: &WebhookPayload) -> Result<(), TransportFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTransportConfig {
    pub server_url: String,
    pub api_token: String,
    pub timeout: Duration,
}

impl WebhookTransportConfig {
    pub fn new(server_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_token: api_token.into(),
            timeout: Duration::from_millis(DEFAULT_WEBHOOK_TIMEOUT_MS),
        }
    }
}

/// Joins the configured server URL with the webhook path.
pub fn webhook_endpoint(server_url: &str) -> String {
    format!("{}{WEBHOOK_PATH}", server_url.trim().trim_end_matches('/'))
}

#[derive(Debug, Clone)]
/// Public struct `HttpWebhookTransport` posting payloads with reqwest.
pub struct HttpWebhookTransport {
    client: reqwest::Client,
    endpoint: String,
    api_token: String,
}

impl HttpWebhookTransport {
    pub fn new(config: WebhookTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self {
            client,
            endpoint: webhook_endpoint(&config.server_url),
            api_token: config.api_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post_payload(&self, payload: &WebhookPayload) -> Result<(), TransportFailure> {
        tracing::debug!(
            endpoint = %self.endpoint,
            remitente = %payload.remitente,
            has_image = payload.has_image(),
            "posting webhook payload"
        );
        let response = self
            .client
            .post(self.endpoint.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportFailure::Status {
            status: status.as_u16(),
            body: truncate_error_body(body.as_str()),
        })
    }
}

fn truncate_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut truncated = trimmed.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>();
    truncated.push_str("...");
    truncated
}
