use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use cloak_crypto::CryptoError;
use cloak_types::api::ErrorBody;

/// Failures of the send and history flows.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("no key available for user {0}")]
    KeyUnavailable(Uuid),

    /// Decrypt/re-encrypt chain broke. `message_id` is `None` at send time,
    /// before a row exists.
    #[error("relay failed: {source}")]
    RelayFailure {
        message_id: Option<Uuid>,
        #[source]
        source: CryptoError,
    },

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "user_not_found",
            Self::KeyUnavailable(_) => "key_unavailable",
            Self::RelayFailure { .. } => "relay_failure",
            Self::Storage(_) => "storage",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::KeyUnavailable(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RelayFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Everything a handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Relay(e) => e.kind(),
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Relay(e) => e.status(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        ApiError::Relay(self).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{} ({}): {}", status, self.kind(), self);
        }

        let body = ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
