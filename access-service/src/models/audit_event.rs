//! Append-only audit log entries.

use super::Actor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Stored in place of a snapshot that could not be serialized.
pub const UNSERIALIZABLE_SNAPSHOT: &str = "<unserializable>";

pub const DEFAULT_AUDIT_LIMIT: i64 = 100;
pub const MAX_AUDIT_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    GroupCreated,
    GroupDeleted,
    MemberAdded,
    MemberRemoved,
    MemberRoleUpdated,
    ScopeGrantCreated,
    ScopeGrantUpdated,
    UserPaired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::GroupCreated => "group_created",
            AuditAction::GroupDeleted => "group_deleted",
            AuditAction::MemberAdded => "member_added",
            AuditAction::MemberRemoved => "member_removed",
            AuditAction::MemberRoleUpdated => "member_role_updated",
            AuditAction::ScopeGrantCreated => "scope_grant_created",
            AuditAction::ScopeGrantUpdated => "scope_grant_updated",
            AuditAction::UserPaired => "user_paired",
        }
    }

    fn resource_type(&self) -> &'static str {
        match self {
            AuditAction::GroupCreated | AuditAction::GroupDeleted => "group",
            AuditAction::MemberAdded
            | AuditAction::MemberRemoved
            | AuditAction::MemberRoleUpdated => "group_membership",
            AuditAction::ScopeGrantCreated | AuditAction::ScopeGrantUpdated => "scope_grant",
            AuditAction::UserPaired => "user",
        }
    }
}

/// Persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AuditEvent {
    pub id: Uuid,
    #[schema(example = "service_account")]
    pub actor_kind: String,
    pub actor_id: String,
    #[schema(example = "member_added")]
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub group_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub service_provider_id: Option<Uuid>,
    #[schema(value_type = Object)]
    pub new_values: serde_json::Value,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

/// Builder for an entry appended inside a mutation's transaction.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    actor_kind: &'static str,
    actor_id: String,
    action: AuditAction,
    resource_id: String,
    group_id: Option<Uuid>,
    user_id: Option<Uuid>,
    service_provider_id: Option<Uuid>,
    new_values: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(actor: &Actor, action: AuditAction, resource_id: impl ToString) -> Self {
        Self {
            actor_kind: actor.kind(),
            actor_id: actor.actor_id(),
            action,
            resource_id: resource_id.to_string(),
            group_id: None,
            user_id: None,
            service_provider_id: Some(actor.service_provider_id()),
            new_values: serde_json::Value::Null,
        }
    }

    /// Entry for a change made by a person acting through the login flow,
    /// outside any service-provider context.
    pub fn by_subject(subject: &str, action: AuditAction, resource_id: impl ToString) -> Self {
        Self {
            actor_kind: "end_user",
            actor_id: subject.to_string(),
            action,
            resource_id: resource_id.to_string(),
            group_id: None,
            user_id: None,
            service_provider_id: None,
            new_values: serde_json::Value::Null,
        }
    }

    pub fn group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn service_provider(mut self, service_provider_id: Uuid) -> Self {
        self.service_provider_id = Some(service_provider_id);
        self
    }

    /// Attach the new-values snapshot. A value that fails to serialize is
    /// recorded as [`UNSERIALIZABLE_SNAPSHOT`] and the mutation proceeds.
    pub fn snapshot<T: Serialize + ?Sized>(mut self, values: &T) -> Self {
        self.new_values = match serde_json::to_value(values) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    action = self.action.as_str(),
                    resource_id = %self.resource_id,
                    error = %e,
                    "Audit snapshot could not be serialized"
                );
                serde_json::Value::String(UNSERIALIZABLE_SNAPSHOT.to_string())
            }
        };
        self
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn into_event(self) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            actor_kind: self.actor_kind.to_string(),
            actor_id: self.actor_id,
            action: self.action.as_str().to_string(),
            resource_type: self.action.resource_type().to_string(),
            resource_id: self.resource_id,
            group_id: self.group_id,
            user_id: self.user_id,
            service_provider_id: self.service_provider_id,
            new_values: self.new_values,
            created_at: Utc::now(),
        }
    }
}

/// Query parameters for listing audit entries.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditFilter {
    pub group_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub service_provider_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditFilter {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.group_id.map_or(true, |id| event.group_id == Some(id))
            && self.user_id.map_or(true, |id| event.user_id == Some(id))
            && self
                .service_provider_id
                .map_or(true, |id| event.service_provider_id == Some(id))
    }
}
