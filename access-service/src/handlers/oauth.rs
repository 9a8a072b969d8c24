//! OAuth2 client-credentials token endpoint for service accounts.

use axum::{
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    TypedHeader,
};

use crate::dtos::oauth::{OAuthErrorResponse, TokenRequest};
use crate::services::ServiceError;
use crate::utils::ClientSecret;
use crate::AppState;

pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(OAuthErrorResponse {
            error: error.to_string(),
            error_description: description.to_string(),
        }),
    )
        .into_response()
}

/// Issue a service-account access token
#[utoipa::path(
    post,
    path = "/oauth/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token issued", body = crate::services::TokenResponse),
        (status = 400, description = "unsupported_grant_type or invalid_request", body = OAuthErrorResponse),
        (status = 401, description = "invalid_client", body = OAuthErrorResponse)
    ),
    tag = "OAuth"
)]
pub async fn token(
    State(state): State<AppState>,
    basic: Option<TypedHeader<Authorization<Basic>>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let req = match form {
        Ok(Form(req)) => req,
        Err(rejection) => {
            tracing::debug!(status = %rejection.status(), "Rejected token request body");
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &rejection.body_text(),
            );
        }
    };

    if req.grant_type != CLIENT_CREDENTIALS_GRANT {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "Only client_credentials is supported",
        );
    }

    // HTTP Basic takes precedence over form fields.
    let credentials = basic
        .map(|TypedHeader(Authorization(basic))| {
            (basic.username().to_string(), basic.password().to_string())
        })
        .or_else(|| req.client_id.clone().zip(req.client_secret.clone()));
    let Some((client_id, client_secret)) = credentials else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Client credentials are required",
        );
    };

    let account = match state
        .admin_service
        .authenticate_client(&client_id, &ClientSecret::new(client_secret))
        .await
    {
        Ok(account) => account,
        Err(ServiceError::Unauthenticated(_)) => {
            return oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "Client authentication failed",
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Client authentication errored");
            return oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Internal server error",
            );
        }
    };

    match state
        .jwt
        .issue_token(account.service_provider_id, account.id)
    {
        Ok(token) => {
            tracing::info!(client_id = %account.client_id, "Access token issued");
            (StatusCode::OK, Json(token)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to sign access token");
            oauth_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "Internal server error",
            )
        }
    }
}
