use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Body posted to `<server>/webhook` and stored verbatim in spillover files.
///
/// Field names are part of the remote endpoint's contract. `imagen` carries
/// base64 without a data-URI prefix and serializes as `null` when absent.
pub struct WebhookPayload {
    pub remitente: String,
    #[serde(default)]
    pub contenido: String,
    #[serde(default)]
    pub imagen: Option<String>,
}

impl WebhookPayload {
    pub fn text(remitente: impl Into<String>, contenido: impl Into<String>) -> Self {
        Self {
            remitente: remitente.into(),
            contenido: contenido.into(),
            imagen: None,
        }
    }

    pub fn has_image(&self) -> bool {
        self.imagen.as_deref().is_some_and(|value| !value.is_empty())
    }
}
