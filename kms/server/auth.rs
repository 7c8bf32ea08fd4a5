use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use kms_engine::KmsError;
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests that do not carry the configured API key, either as
/// `X-API-Key` or as a bearer token. No-op when no key is configured.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key_hash else {
        return Ok(next.run(request).await);
    };

    // blake3::Hash equality is constant time
    let authorized = presented_key(request.headers())
        .is_some_and(|key| blake3::hash(key.as_bytes()) == expected);
    if !authorized {
        warn!(path = %request.uri().path(), "rejected unauthenticated request");
        return Err(ApiError::Kms(KmsError::Unauthorized));
    }
    Ok(next.run(request).await)
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value);
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_presented_key_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(presented_key(&headers), Some("tok"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("hdr"));
        assert_eq!(presented_key(&headers), Some("hdr"));

        let mut basic = HeaderMap::new();
        basic.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(presented_key(&basic), None);
    }
}
