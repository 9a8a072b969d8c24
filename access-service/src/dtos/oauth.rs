use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Form body of the token endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[schema(example = "client_credentials")]
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Accepted and ignored; grants are per group.
    pub scope: Option<String>,
}

/// RFC 6749 error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthErrorResponse {
    #[schema(example = "unsupported_grant_type")]
    pub error: String,
    pub error_description: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the identity provider when the user denied consent.
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    #[schema(example = "alice@example.fr")]
    pub email: String,
    pub sub: String,
}
