use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::groups::PutScopesRequest;
use crate::middleware::CurrentActor;
use crate::models::ScopeGrant;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Create or replace the caller's provider grant on a group
#[utoipa::path(
    put,
    path = "/api/v1/groups/{group_id}/scopes",
    params(("group_id" = Uuid, Path, description = "Group id")),
    request_body = PutScopesRequest,
    responses(
        (status = 201, description = "Grant created", body = ScopeGrant),
        (status = 200, description = "Grant updated", body = ScopeGrant),
        (status = 403, description = "Not authorized on this group", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Group not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Scopes",
    security(("bearer_auth" = []))
)]
pub async fn put_scopes(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(group_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PutScopesRequest>,
) -> Result<(StatusCode, Json<ScopeGrant>), AppError> {
    let (grant, created) = state
        .groups
        .put_scopes(&actor, group_id, req.into())
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(grant)))
}
