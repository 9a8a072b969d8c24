//! Actor resolution for each route family.
//!
//! Every family installs exactly one of these middlewares. The resolved
//! [`Actor`] is stored in the request extensions and read back by handlers
//! through [`CurrentActor`].

use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::Actor;
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::AppState;

/// Largest webhook body read for signature verification.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

/// `/api/v1`: service-account bearer JWT.
pub async fn service_account_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = state.verifier.service_account(req.headers())?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// `/resource/v1`: end-user token introspected at the identity provider.
pub async fn end_user_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = state.verifier.end_user(req.headers()).await?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// `/webhooks`: HMAC over the raw body, checked before anything parses it.
pub async fn webhook_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_WEBHOOK_BODY_BYTES).await.map_err(|e| {
        WEBHOOK_EVENTS_TOTAL.with_label_values(&["rejected"]).inc();
        AppError::BadRequest(anyhow::anyhow!("Unreadable request body: {}", e))
    })?;

    let actor = state
        .verifier
        .webhook(&parts.headers, &bytes)
        .inspect_err(|_| {
            WEBHOOK_EVENTS_TOTAL.with_label_values(&["rejected"]).inc();
        })?;

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// The actor resolved by the route family's middleware.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .cloned()
            .map(CurrentActor)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Request is not authenticated")))
    }
}
