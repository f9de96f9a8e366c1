use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::oauth::StateRejection;

pub type AppResult<T> = Result<T, AppError>;

/// Failures of the OAuth handshake itself (callback parameters, state, PKCE).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing callback parameters")]
    MissingParams,
    #[error("provider reported error: {error}")]
    ProviderReported { error: String },
    #[error("invalid state: {0}")]
    InvalidState(StateRejection),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session signing is not configured")]
    NotConfigured,
    #[error("session token is malformed")]
    Malformed,
    #[error("session signature is invalid")]
    InvalidSignature,
    #[error("session has expired")]
    Expired,
    #[error("session is bound to a different client")]
    FingerprintMismatch,
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("membership error: {0}")]
    Membership(String),
    #[error("authorization error: {0}")]
    Authorization(String),
    #[error("session error: {0}")]
    Session(SessionError),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn membership(message: impl Into<String>) -> Self {
        Self::Membership(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short machine-readable category, used both in JSON bodies and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration",
            AppError::Protocol(_) => "protocol",
            AppError::Provider(_) => "provider",
            AppError::Membership(_) => "membership",
            AppError::Authorization(_) => "authorization",
            AppError::Session(_) => "session",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }

    /// The `?error=` code the login page receives when an OAuth callback fails.
    pub fn login_error_code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "server_not_configured",
            AppError::Protocol(ProtocolError::MissingParams) => "missing_params",
            AppError::Protocol(ProtocolError::ProviderReported { .. }) => "oauth_error",
            AppError::Protocol(ProtocolError::InvalidState(_)) => "invalid_state",
            AppError::Membership(_) => "not_member",
            AppError::Authorization(_) => "no_role",
            _ => "callback_failed",
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Never surface provider bodies, SQL errors or missing-secret details.
            AppError::Configuration(_) => "server is not configured for authentication".to_string(),
            AppError::Provider(_) => "identity provider request failed".to_string(),
            AppError::Database(_) | AppError::Internal(_) => "internal server error".to_string(),
            AppError::Session(_) => "not authenticated".to_string(),
            AppError::PermissionDenied(message)
            | AppError::Unauthorized(message)
            | AppError::BadRequest(message)
            | AppError::NotFound(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ProtocolError> for AppError {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Protocol(_) => StatusCode::BAD_REQUEST,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Membership(_) => StatusCode::FORBIDDEN,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::Session(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        }

        let payload = ErrorResponse {
            error: self.kind().to_string(),
            message: self.public_message(),
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
