//! Browser login through the identity provider, pairing the signed-in
//! identity with its account.

use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use service_core::error::AppError;

use crate::dtos::oauth::{CallbackQuery, LoginResponse};
use crate::AppState;

/// Redirect to the identity provider with a signed state
#[utoipa::path(
    get,
    path = "/auth/login",
    responses((status = 303, description = "Redirect to the identity provider")),
    tag = "Login"
)]
pub async fn login(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let signed_state = state.state_signer.issue()?;
    let url = state.identity.authorize_url(&signed_state)?;
    Ok(Redirect::to(&url))
}

/// Complete the login and pair the identity
#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Identity paired", body = LoginResponse),
        (status = 400, description = "Invalid or expired state", body = crate::dtos::ErrorResponse),
        (status = 401, description = "Code exchange failed", body = crate::dtos::ErrorResponse),
        (status = 404, description = "No account for this email", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Account bound to another identity", body = crate::dtos::ErrorResponse)
    ),
    tag = "Login"
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<LoginResponse>, AppError> {
    if let Some(error) = query.error {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Identity provider returned an error: {}",
            error
        )));
    }

    let signed_state = query
        .state
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing state")))?;
    state.state_signer.verify(&signed_state).map_err(|e| {
        tracing::warn!(error = %e, "Rejected login state");
        AppError::BadRequest(anyhow::anyhow!("Invalid login state"))
    })?;

    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing authorization code")))?;

    let access_token = state.identity.exchange_code(&code).await.map_err(|e| {
        tracing::warn!(error = %e, "Authorization code exchange failed");
        AppError::Unauthorized(anyhow::anyhow!("Authorization code exchange failed"))
    })?;
    let user = state.identity.userinfo(&access_token).await.map_err(|e| {
        tracing::warn!(error = %e, "Userinfo request failed");
        AppError::Unauthorized(anyhow::anyhow!("Could not read the signed-in identity"))
    })?;

    state.pairing.pair(None, &user.email, &user.sub).await?;

    Ok(Json(LoginResponse {
        email: crate::models::normalize_email(&user.email),
        sub: user.sub,
    }))
}
