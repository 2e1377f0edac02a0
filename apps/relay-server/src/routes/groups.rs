//! Group endpoints: create, join, leave, list, history, invite.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::auth::{validate_username, StatusResponse};
use crate::error::{ApiError, ApiErrorBody};
use crate::store::StoreError;
use crate::AppState;

const MAX_GROUP_NAME_LEN: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups", post(create_group))
        .route("/groups/{group_id}/join", post(join_group))
        .route("/groups/{group_id}/leave", post(leave_group))
        .route("/groups/{group_id}/messages", get(group_history))
        .route("/groups/{group_id}/invites", post(invite_user))
        .route("/users/{username}/groups", get(user_groups))
}

fn parse_group_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid group id"))
}

// ---------------------------------------------------------------------------
// POST /api/v1/groups
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub creator: String,
    pub group_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateGroupResponse {
    pub success: bool,
    pub group_id: String,
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/groups",
    tag = "Groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = CreateGroupResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 404, description = "User not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
)]
pub async fn create_group(
    State(state): State<AppState>,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<CreateGroupResponse>), ApiError> {
    let name = body.group_name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Group name is required"));
    }
    if name.len() > MAX_GROUP_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Group name must be {MAX_GROUP_NAME_LEN} characters or fewer"
        )));
    }

    let creator = body.creator.trim();
    if state.storage.find_user(creator).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let group = state.storage.create_group(creator, name).await?;
    tracing::info!(group_id = group.id, %creator, group_name = %group.name, "group created");

    Ok((
        StatusCode::CREATED,
        Json(CreateGroupResponse {
            success: true,
            group_id: group.id.to_string(),
            message: "Group created successfully".to_string(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/groups/{group_id}/join, /leave
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct MembershipRequest {
    pub username: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/groups/{group_id}/join",
    tag = "Groups",
    params(
        ("group_id" = String, Path, description = "Group ID"),
    ),
    request_body = MembershipRequest,
    responses(
        (status = 200, description = "Joined group", body = StatusResponse),
        (status = 404, description = "User or group not found", body = ApiErrorBody),
        (status = 409, description = "Already a member", body = ApiErrorBody),
    ),
)]
pub async fn join_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(body): Json<MembershipRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let group_id = parse_group_id(&group_id)?;
    let username = validate_username(&body.username)?;

    if state.storage.find_user(username).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }
    if state.storage.find_group(group_id).await?.is_none() {
        return Err(ApiError::not_found("Group not found"));
    }

    match state.storage.add_member(username, group_id).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => {
            return Err(ApiError::conflict("Already a member of this group"));
        }
        Err(err) => return Err(err.into()),
    }

    tracing::info!(group_id, %username, "user joined group");
    Ok(StatusResponse::ok("Joined group successfully"))
}

#[utoipa::path(
    post,
    path = "/api/v1/groups/{group_id}/leave",
    tag = "Groups",
    params(
        ("group_id" = String, Path, description = "Group ID"),
    ),
    request_body = MembershipRequest,
    responses(
        (status = 200, description = "Left group", body = StatusResponse),
        (status = 404, description = "User not found", body = ApiErrorBody),
    ),
)]
pub async fn leave_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(body): Json<MembershipRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let group_id = parse_group_id(&group_id)?;
    let username = validate_username(&body.username)?;

    if state.storage.find_user(username).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    // Leaving a group one is not in is not an error.
    let removed = state.storage.remove_member(username, group_id).await?;
    tracing::info!(group_id, %username, removed, "user left group");

    Ok(StatusResponse::ok("Left group successfully"))
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/{username}/groups
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupInfo {
    pub group_id: String,
    pub group_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserGroupsResponse {
    pub success: bool,
    pub groups: Vec<GroupInfo>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}/groups",
    tag = "Groups",
    params(
        ("username" = String, Path, description = "Username"),
    ),
    responses(
        (status = 200, description = "Groups the user belongs to", body = UserGroupsResponse),
        (status = 404, description = "User not found", body = ApiErrorBody),
    ),
)]
pub async fn user_groups(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserGroupsResponse>, ApiError> {
    if state.storage.find_user(&username).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let groups = state
        .storage
        .groups_of(&username)
        .await?
        .into_iter()
        .map(|g| GroupInfo {
            group_id: g.id.to_string(),
            group_name: g.name,
        })
        .collect();

    Ok(Json(UserGroupsResponse {
        success: true,
        groups,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/groups/{group_id}/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageInfo {
    pub sender: String,
    pub content: String,
    /// Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupHistoryResponse {
    pub success: bool,
    pub messages: Vec<MessageInfo>,
}

/// Replay for clients that were offline. Unknown groups have an empty history.
#[utoipa::path(
    get,
    path = "/api/v1/groups/{group_id}/messages",
    tag = "Messages",
    params(
        ("group_id" = String, Path, description = "Group ID"),
    ),
    responses(
        (status = 200, description = "Group history, oldest first", body = GroupHistoryResponse),
        (status = 400, description = "Invalid group id", body = ApiErrorBody),
    ),
)]
pub async fn group_history(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<GroupHistoryResponse>, ApiError> {
    let group_id = parse_group_id(&group_id)?;

    let messages = state
        .storage
        .history(group_id)
        .await?
        .into_iter()
        .map(|m| MessageInfo {
            sender: m.sender,
            content: m.content,
            timestamp: m.created_at.timestamp(),
        })
        .collect();

    Ok(Json(GroupHistoryResponse {
        success: true,
        messages,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/groups/{group_id}/invites
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct InviteRequest {
    pub inviter: String,
    pub invitee: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/groups/{group_id}/invites",
    tag = "Groups",
    params(
        ("group_id" = String, Path, description = "Group ID"),
    ),
    request_body = InviteRequest,
    responses(
        (status = 200, description = "User invited", body = StatusResponse),
        (status = 403, description = "Inviter is not a member", body = ApiErrorBody),
        (status = 404, description = "Group or invitee not found", body = ApiErrorBody),
        (status = 409, description = "Invitee already a member", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
)]
pub async fn invite_user(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(body): Json<InviteRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let group_id = parse_group_id(&group_id)?;
    let inviter = body.inviter.trim();
    let invitee = body.invitee.trim();
    if inviter.is_empty() || invitee.is_empty() {
        return Err(ApiError::bad_request("Inviter and invitee are required"));
    }

    let outcome = state.authority.invite_user(group_id, inviter, invitee).await?;
    tracing::debug!(
        group_id,
        invitee_notified = outcome.invitee_notified,
        members_notified = outcome.members_notified,
        "invite notifications queued"
    );

    Ok(StatusResponse::ok(format!(
        "User {invitee} has been invited to the group"
    )))
}
