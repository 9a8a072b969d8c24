use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Group {
    pub id: Uuid,
    #[schema(example = "Portail RH")]
    pub name: String,
    pub organization_id: Uuid,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: String, organization_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            organization_id,
            created_at: Utc::now(),
        }
    }
}
