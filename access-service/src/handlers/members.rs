use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::groups::{AddMemberRequest, UpdateRoleRequest};
use crate::middleware::CurrentActor;
use crate::models::MemberView;
use crate::services::MemberRef;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Add a member by email or user id
#[utoipa::path(
    post,
    path = "/api/v1/groups/{group_id}/members",
    params(("group_id" = Uuid, Path, description = "Group id")),
    request_body = AddMemberRequest,
    responses(
        (status = 201, description = "Member added", body = MemberView),
        (status = 400, description = "Neither or both of email and user_id", body = crate::dtos::ErrorResponse),
        (status = 403, description = "Not authorized on this group", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Group or user not found", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Already a member", body = crate::dtos::ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn add_member(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(group_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AddMemberRequest>,
) -> Result<(StatusCode, Json<MemberView>), AppError> {
    let member = match (req.email, req.user_id) {
        (Some(email), None) => MemberRef::Email(email),
        (None, Some(user_id)) => MemberRef::UserId(user_id),
        _ => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Exactly one of email and user_id is required"
            )))
        }
    };

    let view = state
        .groups
        .add_user(&actor, group_id, member, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Remove a member
#[utoipa::path(
    delete,
    path = "/api/v1/groups/{group_id}/members/{user_id}",
    params(
        ("group_id" = Uuid, Path, description = "Group id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Not authorized, or last admin", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Not a member", body = crate::dtos::ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.groups.remove_user(&actor, group_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Change a member's role
#[utoipa::path(
    patch,
    path = "/api/v1/groups/{group_id}/members/{user_id}",
    params(
        ("group_id" = Uuid, Path, description = "Group id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = MemberView),
        (status = 400, description = "Malformed body or unknown role", body = crate::dtos::ErrorResponse),
        (status = 403, description = "Not authorized, or last admin", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Not a member", body = crate::dtos::ErrorResponse)
    ),
    tag = "Members",
    security(("bearer_auth" = []))
)]
pub async fn update_member_role(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<Json<MemberView>, AppError> {
    let view = state
        .groups
        .update_user_role(&actor, group_id, user_id, req.role)
        .await?;
    Ok(Json(view))
}
