//! Local HTTP API of the Puente relay.
//!
//! `POST /enviar-mensaje` sends a WhatsApp text through the live session and
//! `GET /health` reports connection state, spillover backlog and uptime.

pub mod relay_gateway;

pub use relay_gateway::{
    build_relay_gateway_router, run_relay_gateway_server, RelayGatewayConfig, RelayGatewayState,
    HEALTH_ENDPOINT, MAX_REQUEST_BODY_BYTES, SEND_MESSAGE_ENDPOINT,
};
