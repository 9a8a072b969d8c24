//! Group endpoints, mounted for service accounts and for end users.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::groups::{CreateGroupRequest, GroupDetailResponse};
use crate::middleware::CurrentActor;
use crate::models::Group;
use crate::services::NewGroup;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Create a group with its admin and the caller's scope grant
#[utoipa::path(
    post,
    path = "/api/v1/groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 400, description = "Invalid input or SIRET", body = crate::dtos::ErrorResponse),
        (status = 401, description = "Unauthenticated", body = crate::dtos::ErrorResponse),
        (status = 403, description = "Caller may not create groups", body = crate::dtos::ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn create_group(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ValidatedJson(req): ValidatedJson<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let scope_grant = Some(req.grant_input());
    let created = state
        .groups
        .create_group(
            &actor,
            NewGroup {
                name: req.name,
                organization_siret: req.organization_siret,
                admin_email: req.admin_email,
                scope_grant,
                extra_members: req.extra_members,
                notify: true,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(created.group)))
}

/// List the groups visible to the caller
#[utoipa::path(
    get,
    path = "/api/v1/groups",
    responses(
        (status = 200, description = "Visible groups", body = Vec<Group>),
        (status = 401, description = "Unauthenticated", body = crate::dtos::ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn list_groups(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Group>>, AppError> {
    Ok(Json(state.groups.list_groups(&actor).await?))
}

/// Get a group with its organization, members and grants
#[utoipa::path(
    get,
    path = "/api/v1/groups/{group_id}",
    params(("group_id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 200, description = "Group detail", body = GroupDetailResponse),
        (status = 403, description = "Not authorized on this group", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Group not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn get_group(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupDetailResponse>, AppError> {
    let detail = state.groups.get_group(&actor, group_id).await?;
    Ok(Json(detail.into()))
}

/// Delete a group with its memberships and grants
#[utoipa::path(
    delete,
    path = "/api/v1/groups/{group_id}",
    params(("group_id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 403, description = "Not authorized on this group", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Group not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Groups",
    security(("bearer_auth" = []))
)]
pub async fn delete_group(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(group_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.groups.delete_group(&actor, group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
