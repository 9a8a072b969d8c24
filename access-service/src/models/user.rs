use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Internal account. Created lazily on first email reference.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct User {
    pub id: Uuid,
    #[schema(example = "alice@example.fr")]
    pub email: String,
    /// External subject; set at most once.
    pub sub: Option<String>,
    pub verified: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            sub: None,
            verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Emails are stored and compared lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_is_unbound_and_unverified() {
        let user = User::new("  Alice@Example.FR ");
        assert_eq!(user.email, "alice@example.fr");
        assert!(user.sub.is_none());
        assert!(!user.verified);
    }
}
