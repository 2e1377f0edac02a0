use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::gateway::fanout::InviteError;
use crate::store::StoreError;

/// Failure body of every unary route. Mirrors the success shape so clients
/// can always branch on `success`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub success: bool,
    pub message: String,
    pub code: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            success: false,
            message: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => {
                tracing::error!(error = %err, "storage unavailable");
                Self::unavailable("Storage is temporarily unavailable")
            }
            StoreError::NotFound(what) => Self::not_found(format!("{} not found", capitalize(&what))),
            StoreError::Conflict(_) => Self::conflict("Resource already exists"),
            StoreError::Database(_) => {
                tracing::error!(error = %err, "database error");
                Self::internal("An internal error occurred")
            }
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        let message = err.to_string();
        match err {
            InviteError::GroupNotFound | InviteError::UnknownInvitee => Self::not_found(message),
            InviteError::InviterNotMember => Self::forbidden(message),
            InviteError::AlreadyMember => Self::conflict(message),
            InviteError::Storage(StoreError::Unavailable(_)) => Self::unavailable(message),
            InviteError::Storage(inner) => {
                tracing::error!(error = %inner, "invite failed");
                Self::internal(message)
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
