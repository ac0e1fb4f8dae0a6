//! WhatsApp session side of the Puente relay.
//!
//! A [`SessionProvider`] owns the actual WhatsApp Web session; the bundled
//! [`WsSidecarProvider`] reaches it through a sidecar process over WebSocket.
//! The supervisor started by [`start_session_supervisor`] keeps that session
//! alive. It feeds connection updates into the [`ConnectionGate`], persists
//! credentials through the [`CredentialStore`] and hands received messages to
//! the [`EventRelay`] for webhook delivery.

pub mod connection_gate;
pub mod credential_store;
pub mod event_relay;
pub mod pairing_qr;
pub mod session_events;
pub mod session_provider;
pub mod session_supervisor;
pub mod sidecar_protocol;
pub mod sidecar_provider;
#[cfg(test)]
mod test_support;

pub use connection_gate::{
    ConnectionGate, ConnectionState, GateTransition, ReconnectDecision,
    DEFAULT_RECONNECT_DELAY_MS, LOGGED_OUT_STATUS_CODE,
};
pub use credential_store::{CredentialStore, DEFAULT_SESSION_DIR};
pub use event_relay::{
    attach_image_bytes, EventRelay, InboundDisposition, InboundSkip, OutboundError,
    IMAGE_DEFAULT_TEXT, IMAGE_TOO_LARGE_MARKER, MAX_INBOUND_IMAGE_BYTES,
};
pub use pairing_qr::render_pairing_qr;
pub use session_events::{
    ConnectionPhase, ConnectionUpdate, ExtendedTextMessage, ImageMessage, InboundMessage,
    LastDisconnect, MessageContent, MessageKey, SessionEvent,
};
pub use session_provider::{SessionProvider, SessionRequestError};
pub use session_supervisor::{start_session_supervisor, SessionSupervisorHandle, SupervisorExit};
pub use sidecar_protocol::{
    encode_sidecar_frame, parse_sidecar_frame, SidecarInboundFrame, SidecarOutboundFrame,
};
pub use sidecar_provider::{
    SidecarProviderConfig, WsSidecarProvider, DEFAULT_SIDECAR_REQUEST_TIMEOUT_MS,
    DEFAULT_SIDECAR_URL,
};
