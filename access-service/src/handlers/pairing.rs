use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::groups::{PairRequest, PairingResponse};
use crate::middleware::CurrentActor;
use crate::models::normalize_email;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Bind an identity-provider subject to the account of an email
#[utoipa::path(
    post,
    path = "/api/v1/pairings",
    request_body = PairRequest,
    responses(
        (status = 200, description = "Paired, or already paired to the same subject", body = PairingResponse),
        (status = 404, description = "No account for this email", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Bound to a different subject", body = crate::dtos::ErrorResponse)
    ),
    tag = "Pairing",
    security(("bearer_auth" = []))
)]
pub async fn pair(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ValidatedJson(req): ValidatedJson<PairRequest>,
) -> Result<Json<PairingResponse>, AppError> {
    let outcome = state.pairing.pair(Some(&actor), &req.email, &req.sub).await?;
    Ok(Json(PairingResponse::new(
        normalize_email(&req.email),
        req.sub,
        Some(outcome),
    )))
}

/// Email bound to a subject
#[utoipa::path(
    get,
    path = "/api/v1/pairings/{sub}",
    params(("sub" = String, Path, description = "Identity-provider subject")),
    responses(
        (status = 200, description = "Bound account", body = PairingResponse),
        (status = 404, description = "Subject is not paired", body = crate::dtos::ErrorResponse)
    ),
    tag = "Pairing",
    security(("bearer_auth" = []))
)]
pub async fn get_pairing(
    State(state): State<AppState>,
    Path(sub): Path<String>,
) -> Result<Json<PairingResponse>, AppError> {
    let email = state
        .pairing
        .get(&sub)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subject is not paired")))?;
    Ok(Json(PairingResponse::new(email, sub, None)))
}
