use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use super::types::RelayApiError;

pub(super) fn authorize_relay_request(
    headers: &HeaderMap,
    expected_token: &str,
) -> Result<(), RelayApiError> {
    match bearer_token_from_headers(headers) {
        Some(token) if token == expected_token => Ok(()),
        _ => {
            tracing::warn!("rejected relay request with missing or invalid bearer token");
            Err(RelayApiError::unauthorized())
        }
    }
}

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?;
    let raw = header.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
