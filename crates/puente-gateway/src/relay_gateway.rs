//! HTTP surface of the relay: outbound sends and a health probe.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use puente_delivery::SpilloverStore;
use puente_session::EventRelay;
use tokio::net::TcpListener;

mod auth;
mod types;

use auth::authorize_relay_request;
use types::{HealthResponse, RelayApiError, SendMessageRequest, SendMessageResponse};

pub const SEND_MESSAGE_ENDPOINT: &str = "/enviar-mensaje";
pub const HEALTH_ENDPOINT: &str = "/health";
pub const MAX_REQUEST_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayGatewayConfig {
    pub bind: SocketAddr,
}

/// Public struct `RelayGatewayState` shared by every HTTP handler.
pub struct RelayGatewayState {
    relay: EventRelay,
    store: Arc<SpilloverStore>,
    api_token: String,
    started_at: Instant,
}

impl RelayGatewayState {
    pub fn new(relay: EventRelay, store: Arc<SpilloverStore>, api_token: impl Into<String>) -> Self {
        Self {
            relay,
            store,
            api_token: api_token.into(),
            started_at: Instant::now(),
        }
    }
}

pub fn build_relay_gateway_router(state: Arc<RelayGatewayState>) -> Router {
    Router::new()
        .route(SEND_MESSAGE_ENDPOINT, post(handle_send_message))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

/// Serves the relay API until `shutdown` resolves.
pub async fn run_relay_gateway_server<F>(
    config: RelayGatewayConfig,
    state: Arc<RelayGatewayState>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind relay gateway on {}", config.bind))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound relay gateway address")?;
    tracing::info!(addr = %local_addr, "relay gateway listening");

    axum::serve(listener, build_relay_gateway_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay gateway server exited unexpectedly")?;
    tracing::info!("relay gateway stopped");
    Ok(())
}

async fn handle_send_message(
    State(state): State<Arc<RelayGatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = authorize_relay_request(&headers, &state.api_token) {
        return error.into_response();
    }
    let Some(request) = SendMessageRequest::from_body(&body) else {
        return RelayApiError::missing_fields().into_response();
    };
    match state
        .relay
        .send_outbound(&request.numero, &request.texto)
        .await
    {
        Ok(()) => Json(SendMessageResponse::sent()).into_response(),
        Err(error) => RelayApiError::from(error).into_response(),
    }
}

async fn handle_health(State(state): State<Arc<RelayGatewayState>>) -> Response {
    let store = Arc::clone(&state.store);
    let counted = tokio::task::spawn_blocking(move || store.pending_count()).await;
    let cola_pendiente = match counted {
        Ok(Ok(count)) => count,
        Ok(Err(error)) => {
            tracing::error!(error = %error, "failed to count pending spillover files");
            return RelayApiError::internal(error.to_string()).into_response();
        }
        Err(error) => {
            tracing::error!(error = %error, "pending count task failed");
            return RelayApiError::internal(error.to_string()).into_response();
        }
    };
    Json(HealthResponse {
        status: "ok",
        whatsapp: state.relay.gate().state().health_label(),
        cola_pendiente,
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
    .into_response()
}
