pub mod announcements;
pub mod auth;
pub mod groups;
pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            auth::router()
                .merge(groups::router())
                .merge(announcements::router()),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Auth
        auth::register,
        auth::login,
        // Groups
        groups::create_group,
        groups::join_group,
        groups::leave_group,
        groups::user_groups,
        groups::invite_user,
        // Messages
        groups::group_history,
        // Announcements
        announcements::announce,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            health::HealthResponse,
            auth::CredentialsRequest,
            auth::StatusResponse,
            groups::CreateGroupRequest,
            groups::CreateGroupResponse,
            groups::MembershipRequest,
            groups::GroupInfo,
            groups::UserGroupsResponse,
            groups::MessageInfo,
            groups::GroupHistoryResponse,
            groups::InviteRequest,
            announcements::AnnouncementRequest,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Auth", description = "Registration and login"),
        (name = "Groups", description = "Group membership"),
        (name = "Messages", description = "Group history"),
        (name = "Announcements", description = "Server announcements"),
    )
)]
pub struct ApiDoc;
