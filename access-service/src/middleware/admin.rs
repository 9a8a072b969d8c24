use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;

pub const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

/// Guards operator routes with the shared `X-Admin-Api-Key`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.security.admin_api_key.as_bytes();
    let provided = headers
        .get(ADMIN_API_KEY_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    // An empty configured key disables the admin surface.
    let valid = !expected.is_empty()
        && provided.len() == expected.len()
        && bool::from(provided.ct_eq(expected));

    if valid {
        return next.run(request).await;
    }

    tracing::warn!("Failed admin authentication attempt");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized: Invalid or missing admin API key" })),
    )
        .into_response()
}
