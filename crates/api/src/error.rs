//! Error handling for the DAV endpoints

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kalends_core::StoreError;

/// Request-level error that knows its HTTP shape.
///
/// Authorization failures carry the challenge material so the response
/// can emit `WWW-Authenticate` with a live nonce.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized {
        realm: String,
        nonce: String,
        stale: bool,
    },
    #[error("Forbidden")]
    Forbidden,
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Precondition Failed")]
    PreconditionFailed,
    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),
    #[error("Insufficient Storage")]
    InsufficientStorage,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                tracing::info!("bad request: {msg}");
                StatusCode::BAD_REQUEST.into_response()
            }
            ApiError::Unauthorized {
                realm,
                nonce,
                stale,
            } => {
                let challenge = format!(
                    "Digest realm=\"{realm}\", algorithm=\"MD5-sess\", \
                     qop=\"auth,auth-int\", nonce=\"{nonce}\", stale={stale}"
                );
                let value = HeaderValue::from_str(&challenge)
                    .unwrap_or_else(|_| HeaderValue::from_static("Digest"));
                (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, value)],
                )
                    .into_response()
            }
            ApiError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            ApiError::NotFound(msg) => {
                tracing::debug!("not found: {msg}");
                StatusCode::NOT_FOUND.into_response()
            }
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            ApiError::Conflict(msg) => {
                tracing::info!("conflict: {msg}");
                StatusCode::CONFLICT.into_response()
            }
            ApiError::PreconditionFailed => StatusCode::PRECONDITION_FAILED.into_response(),
            ApiError::UnsupportedMediaType(msg) => {
                tracing::info!("unsupported media type: {msg}");
                StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response()
            }
            ApiError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE.into_response(),
            // Storage faults surface as 505, matching the rest of the
            // protocol machine.
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                StatusCode::HTTP_VERSION_NOT_SUPPORTED.into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("XML write error: {err}"))
    }
}
