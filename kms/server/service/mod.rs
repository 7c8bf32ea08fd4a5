pub mod audit_service;
pub mod health_service;
pub mod key_service;
pub mod mpc_service;
pub mod secret_service;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Duration;
use kms_engine::{Kms, KmsError, KmsResult};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

/// Runs an engine call on the blocking pool.
pub(crate) async fn run<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(&Kms) -> KmsResult<T> + Send + 'static,
    T: Send + 'static,
{
    let kms = state.kms.clone();
    Ok(tokio::task::spawn_blocking(move || op(&kms)).await??)
}

/// Strict standard-alphabet base64 for a named request field.
pub(crate) fn decode_b64(field: &str, value: &str) -> ApiResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| ApiError::Kms(KmsError::InvalidRequestBody(format!("invalid {field} encoding"))))
}

/// `expiresInSecs` as a chrono duration; out-of-range values are a bad request.
pub(crate) fn expiry_from_secs(secs: Option<i64>) -> ApiResult<Option<Duration>> {
    secs.map(|s| {
        Duration::try_seconds(s)
            .ok_or_else(|| ApiError::Kms(KmsError::InvalidRequestBody("expiresInSecs out of range".into())))
    })
    .transpose()
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("route not found".to_string())
}
