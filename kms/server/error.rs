//! HTTP error mapping. Every failure leaves the server as `{error, statusCode, message}`.

use axum::extract::FromRequest;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kms_engine::KmsError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Kms(#[from] KmsError),
    /// Route exists but the subject does not, or the route itself is unknown.
    #[error("{0}")]
    NotFound(String),
    /// A blocking worker panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    status_code: u16,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Kms(err) => kms_status(err),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Storage and serialization detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Kms(KmsError::Storage(_) | KmsError::Serde(_) | KmsError::Config(_))
            | ApiError::Worker(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

fn kms_status(err: &KmsError) -> StatusCode {
    match err {
        KmsError::NotFound { .. } => StatusCode::NOT_FOUND,
        KmsError::AlreadyExists { .. } => StatusCode::CONFLICT,
        KmsError::Unauthorized => StatusCode::UNAUTHORIZED,
        KmsError::DecryptionFailure
        | KmsError::Crypto(_)
        | KmsError::Config(_)
        | KmsError::Storage(_)
        | KmsError::Serde(_) => StatusCode::INTERNAL_SERVER_ERROR,
        KmsError::WrongUsage { .. }
        | KmsError::InactiveKey(_)
        | KmsError::UnsupportedKeyType(_)
        | KmsError::NotAsymmetric(_)
        | KmsError::InvalidThreshold { .. }
        | KmsError::ParticipantCountMismatch { .. }
        | KmsError::NotAParticipant { .. }
        | KmsError::DuplicateSignature(_)
        | KmsError::RequestExpired(_)
        | KmsError::AlreadyComplete(_)
        | KmsError::RequestFailed(_)
        | KmsError::InvalidRequestBody(_)
        | KmsError::MalformedInput(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let message = self.public_message();
        let body = ErrorBody {
            error: message.clone(),
            status_code: status.as_u16(),
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Kms(KmsError::InvalidRequestBody(rejection.body_text()))
    }
}

/// `Json` whose rejections use the API error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl<T: Serialize> IntoResponse for ApiJson<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(KmsError::not_found("key", "k1")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(KmsError::AlreadyExists { kind: "secret", id: "A".into() }).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::from(KmsError::Unauthorized).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(KmsError::InactiveKey("k1".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(KmsError::DecryptionFailure).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_detail_is_hidden() {
        let err = ApiError::from(KmsError::Storage(kms_engine::StorageError::Corrupt(
            "kms/key/abc".into(),
        )));
        assert_eq!(err.public_message(), "internal error");

        let err = ApiError::from(KmsError::DecryptionFailure);
        assert_eq!(err.public_message(), "decryption failed");
    }
}
