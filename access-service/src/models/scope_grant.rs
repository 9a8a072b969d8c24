use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Access granted to a service provider on a group. One row per
/// (service_provider_id, group_id).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScopeGrant {
    pub service_provider_id: Uuid,
    pub group_id: Uuid,
    /// Space separated scope list.
    #[schema(example = "openid profile")]
    pub scopes: String,
    #[schema(example = "9001")]
    pub contract_description: String,
    pub contract_url: String,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl ScopeGrant {
    pub fn scope_list(&self) -> Vec<&str> {
        self.scopes.split_whitespace().collect()
    }
}

/// Values written by a create-or-update of a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGrantInput {
    pub scopes: Vec<String>,
    pub contract_description: String,
    pub contract_url: String,
}

impl ScopeGrantInput {
    /// Deduplicated, space joined scopes in first-seen order.
    pub fn joined_scopes(&self) -> String {
        let mut seen: Vec<&str> = Vec::with_capacity(self.scopes.len());
        for scope in self.scopes.iter().flat_map(|s| s.split_whitespace()) {
            if !seen.contains(&scope) {
                seen.push(scope);
            }
        }
        seen.join(" ")
    }

    pub fn into_grant(self, service_provider_id: Uuid, group_id: Uuid) -> ScopeGrant {
        ScopeGrant {
            service_provider_id,
            group_id,
            scopes: self.joined_scopes(),
            contract_description: self.contract_description,
            contract_url: self.contract_url,
            updated_at: Utc::now(),
        }
    }
}
