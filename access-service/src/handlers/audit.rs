use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::models::{AuditEvent, AuditFilter};
use crate::AppState;

/// List audit entries, newest first
#[utoipa::path(
    get,
    path = "/admin/audit-events",
    params(AuditFilter),
    responses(
        (status = 200, description = "Audit entries", body = Vec<AuditEvent>),
        (status = 401, description = "Unauthorized", body = crate::dtos::ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn list_audit_events(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    Ok(Json(state.groups.list_audit_events(&filter).await?))
}
