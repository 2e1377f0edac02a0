//! Server-originated announcements to everyone online.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use super::auth::StatusResponse;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/announcements", post(announce))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnnouncementRequest {
    pub content: String,
}

/// Queue a `System` message for every connected user. Not persisted; users
/// who are offline never see it.
#[utoipa::path(
    post,
    path = "/api/v1/announcements",
    tag = "Announcements",
    request_body = AnnouncementRequest,
    responses(
        (status = 200, description = "Announcement queued", body = StatusResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
    ),
)]
pub async fn announce(
    State(state): State<AppState>,
    Json(body): Json<AnnouncementRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("Announcement content is required"));
    }

    let reached = state.authority.announce(content);
    Ok(StatusResponse::ok(format!("Announcement sent to {reached} user(s)")))
}
