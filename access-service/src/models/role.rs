use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Membership role. Ids match the rows seeded in the `roles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    pub fn id(self) -> i16 {
        match self {
            GroupRole::Admin => 1,
            GroupRole::Member => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(GroupRole::Admin),
            2 => Some(GroupRole::Member),
            _ => None,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, GroupRole::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }
}

impl std::str::FromStr for GroupRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(GroupRole::Admin),
            "member" => Ok(GroupRole::Member),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}
