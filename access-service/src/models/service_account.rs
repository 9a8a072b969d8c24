use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ServiceAccount {
    pub id: Uuid,
    pub service_provider_id: Uuid,
    #[schema(example = "sa_3f2a9c1e0b7d4e58")]
    pub client_id: String,
    #[serde(skip_serializing)]
    #[schema(read_only)]
    pub secret_hash: String, // Argon2 hash
    pub active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl ServiceAccount {
    pub fn new(service_provider_id: Uuid, client_id: String, secret_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_provider_id,
            client_id,
            secret_hash,
            active: true,
            created_at: Utc::now(),
        }
    }
}
