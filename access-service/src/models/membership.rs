use super::GroupRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupMembership {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub role_id: i16,
    pub created_at: DateTime<Utc>,
}

impl GroupMembership {
    pub fn new(group_id: Uuid, user_id: Uuid, role: GroupRole) -> Self {
        Self {
            group_id,
            user_id,
            role_id: role.id(),
            created_at: Utc::now(),
        }
    }

    /// Unknown role ids are treated as the least privileged role.
    pub fn role(&self) -> GroupRole {
        GroupRole::from_id(self.role_id).unwrap_or(GroupRole::Member)
    }

    pub fn is_admin(&self) -> bool {
        self.role().is_admin()
    }
}

/// Membership joined with the member's account, as listed on a group.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct MemberView {
    pub user_id: Uuid,
    #[schema(example = "bob@example.fr")]
    pub email: String,
    pub verified: bool,
    pub role_id: i16,
}

impl MemberView {
    pub fn role(&self) -> GroupRole {
        GroupRole::from_id(self.role_id).unwrap_or(GroupRole::Member)
    }
}
