use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Reserved provider under which webhook-provisioned contracts are recorded.
/// Seeded by the initial migration.
pub const WEBHOOK_PROVIDER_ID: Uuid = Uuid::from_u128(1);

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ServiceProvider {
    pub id: Uuid,
    #[schema(example = "Portail RH")]
    pub name: String,
    /// OIDC client id used to map introspected end-user tokens.
    pub oidc_client_id: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl ServiceProvider {
    pub fn new(name: String, oidc_client_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            oidc_client_id,
            created_at: Utc::now(),
        }
    }

    pub fn is_webhook_identity(&self) -> bool {
        self.id == WEBHOOK_PROVIDER_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_id_matches_migration_seed() {
        assert_eq!(
            WEBHOOK_PROVIDER_ID.to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
    }
}
