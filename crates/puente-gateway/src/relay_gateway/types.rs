use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use puente_session::OutboundError;
use serde::Serialize;
use serde_json::{json, Value};

pub(super) const UNAUTHORIZED_MESSAGE: &str = "No autorizado";
pub(super) const MISSING_FIELDS_MESSAGE: &str = "Faltan parámetros";
pub(super) const DISCONNECTED_MESSAGE: &str = "WhatsApp desconectado";
pub(super) const DISCONNECTED_REMEDY: &str = "Reconecta WhatsApp escaneando el código QR";
pub(super) const SENT_MESSAGE: &str = "Enviado correctamente";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Error response of the relay HTTP API: `{"error": ..., "solucion"?: ...}`.
pub(super) struct RelayApiError {
    pub(super) status: StatusCode,
    pub(super) message: String,
    pub(super) remedy: Option<&'static str>,
}

impl RelayApiError {
    pub(super) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            remedy: None,
        }
    }

    pub(super) fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE)
    }

    pub(super) fn missing_fields() -> Self {
        Self::new(StatusCode::BAD_REQUEST, MISSING_FIELDS_MESSAGE)
    }

    pub(super) fn disconnected() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: DISCONNECTED_MESSAGE.to_string(),
            remedy: Some(DISCONNECTED_REMEDY),
        }
    }

    pub(super) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<OutboundError> for RelayApiError {
    fn from(error: OutboundError) -> Self {
        match error {
            OutboundError::Validation => Self::missing_fields(),
            OutboundError::Disconnected => Self::disconnected(),
            OutboundError::SendFailed(message) => Self::internal(message),
        }
    }
}

impl IntoResponse for RelayApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let (Some(remedy), Value::Object(fields)) = (self.remedy, &mut body) {
            fields.insert("solucion".to_string(), Value::String(remedy.to_string()));
        }
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(super) struct SendMessageResponse {
    pub(super) ok: bool,
    pub(super) mensaje: &'static str,
}

impl SendMessageResponse {
    pub(super) fn sent() -> Self {
        Self {
            ok: true,
            mensaje: SENT_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct HealthResponse {
    pub(super) status: &'static str,
    pub(super) whatsapp: &'static str,
    pub(super) cola_pendiente: usize,
    pub(super) uptime: f64,
}

/// Fields of a send request that passed the presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SendMessageRequest {
    pub(super) numero: String,
    pub(super) texto: String,
}

impl SendMessageRequest {
    /// Extracts `numero` and `texto`; a body that is not JSON counts as
    /// missing fields.
    pub(super) fn from_body(body: &[u8]) -> Option<Self> {
        let parsed = serde_json::from_slice::<Value>(body).ok()?;
        Some(Self {
            numero: required_text_field(&parsed, "numero")?,
            texto: required_text_field(&parsed, "texto")?,
        })
    }
}

fn required_text_field(body: &Value, key: &str) -> Option<String> {
    let value = match body.get(key)? {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    // Whitespace-only counts as missing, matching `EventRelay::send_outbound`.
    if value.trim().is_empty() {
        return None;
    }
    Some(value)
}
