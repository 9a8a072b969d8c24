use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::IssuedCredentials;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateServiceProviderRequest {
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    #[schema(example = "Portail RH")]
    pub name: String,

    /// Client id the provider's users authenticate through at the identity
    /// provider.
    #[validate(length(min = 1, max = 255))]
    #[schema(example = "portail-rh")]
    pub oidc_client_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceAccountCreatedResponse {
    pub id: Uuid,
    pub service_provider_id: Uuid,
    #[schema(example = "sa_2xKq9bQ0m7Rz1c4Vt8yA3w")]
    pub client_id: String,
    /// Shown once. Only its hash is stored.
    pub client_secret: String,
}

impl From<IssuedCredentials> for ServiceAccountCreatedResponse {
    fn from(issued: IssuedCredentials) -> Self {
        Self {
            id: issued.account.id,
            service_provider_id: issued.account.service_provider_id,
            client_id: issued.account.client_id,
            client_secret: issued.client_secret.into_string(),
        }
    }
}
