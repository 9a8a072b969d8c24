use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::admin::{CreateServiceProviderRequest, ServiceAccountCreatedResponse};
use crate::models::ServiceProvider;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Register a service provider
#[utoipa::path(
    post,
    path = "/admin/service-providers",
    request_body = CreateServiceProviderRequest,
    responses(
        (status = 201, description = "Service provider registered", body = ServiceProvider),
        (status = 400, description = "Validation error", body = crate::dtos::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dtos::ErrorResponse),
        (status = 409, description = "OIDC client id already registered", body = crate::dtos::ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn create_service_provider(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateServiceProviderRequest>,
) -> Result<(StatusCode, Json<ServiceProvider>), AppError> {
    let provider = state
        .admin_service
        .create_service_provider(&req.name, req.oidc_client_id)
        .await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

/// Create a service account; the secret is returned only here
#[utoipa::path(
    post,
    path = "/admin/service-providers/{service_provider_id}/service-accounts",
    params(("service_provider_id" = Uuid, Path, description = "Owning service provider")),
    responses(
        (status = 201, description = "Service account created", body = ServiceAccountCreatedResponse),
        (status = 401, description = "Unauthorized", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Service provider not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn create_service_account(
    State(state): State<AppState>,
    Path(service_provider_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ServiceAccountCreatedResponse>), AppError> {
    let issued = state
        .admin_service
        .create_service_account(service_provider_id)
        .await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}
