//! Account routes: registration and password login.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::store::StoreError;
use crate::AppState;

const MAX_USERNAME_LEN: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/register
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/register",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Registration successful", body = StatusResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 409, description = "Username already exists", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
)]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let username = validate_username(&body.username)?;
    if body.password.is_empty() {
        return Err(ApiError::bad_request("Password is required"));
    }

    if state.storage.find_user(username).await?.is_some() {
        return Err(ApiError::conflict("Username already exists"));
    }

    let password_hash = hash_password(&body.password)?;
    match state.storage.create_user(username, &password_hash).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, %username, "user registered");
            Ok((StatusCode::CREATED, StatusResponse::ok("Registration successful")))
        }
        Err(StoreError::Conflict(_)) => Err(ApiError::conflict("Username already exists")),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/login
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/login",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Login successful", body = StatusResponse),
        (status = 401, description = "Invalid password", body = ApiErrorBody),
        (status = 404, description = "User not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let username = body.username.trim();
    let user = state
        .storage
        .find_user(username)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    verify_password(&body.password, &user.password_hash)?;

    tracing::info!(user_id = user.id, %username, "user logged in");
    Ok(StatusResponse::ok("Login successful"))
}

/// Trimmed username, or a validation error.
pub(crate) fn validate_username(raw: &str) -> Result<&str, ApiError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request("Username is required"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Username must be {MAX_USERNAME_LEN} characters or fewer"
        )));
    }
    if username == crate::gateway::events::SYSTEM_SENDER {
        return Err(ApiError::bad_request("Username is reserved"));
    }
    Ok(username)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    use argon2::Argon2;
    use password_hash::rand_core::OsRng;
    use password_hash::{PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!(?e, "password hashing failed");
            ApiError::internal("Failed to process password")
        })
}

fn verify_password(password: &str, hash: &str) -> Result<(), ApiError> {
    use argon2::Argon2;
    use password_hash::{PasswordHash, PasswordVerifier};

    let parsed = PasswordHash::new(hash).map_err(|_| ApiError::internal("invalid hash format"))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::unauthorized("Invalid password"))
}
