//! Storage ports.
//!
//! Engine operations run against a [`StoreTx`]: every read and write of one
//! operation goes through the same transaction, and nothing is visible to
//! other callers until [`StoreTx::commit`]. Dropping a transaction without
//! committing rolls it back.

use crate::models::{
    AuditEvent, AuditFilter, Group, GroupMembership, GroupRole, MemberView, Organization,
    ScopeGrant, ServiceAccount, ServiceProvider, User,
};
use crate::services::ServiceError;
use async_trait::async_trait;
use uuid::Uuid;

/// Names of the uniqueness constraints both backends enforce.
pub mod constraints {
    pub const USER_EMAIL: &str = "users_email_key";
    pub const USER_SUBJECT: &str = "users_sub_key";
    pub const ORGANIZATION_SIRET: &str = "organizations_siret_key";
    pub const MEMBERSHIP: &str = "group_memberships_pkey";
    pub const WEBHOOK_CONTRACT: &str = "uq_scope_grants_webhook_contract";
    pub const SERVICE_ACCOUNT_CLIENT_ID: &str = "service_accounts_client_id_key";
    pub const SERVICE_PROVIDER_CLIENT_ID: &str = "service_providers_oidc_client_id_key";
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait StoreTx: Send {
    // Users
    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_subject(&mut self, sub: &str) -> Result<Option<User>, ServiceError>;
    async fn insert_user(&mut self, user: &User) -> Result<(), ServiceError>;
    /// Sets `sub` and marks the user verified only while `sub` is still
    /// unset. Returns whether this call performed the bind.
    async fn bind_subject_if_unset(&mut self, user_id: Uuid, sub: &str)
        -> Result<bool, ServiceError>;

    // Organizations
    async fn find_organization(&mut self, id: Uuid) -> Result<Option<Organization>, ServiceError>;
    async fn find_organization_by_siret(
        &mut self,
        siret: &str,
    ) -> Result<Option<Organization>, ServiceError>;
    async fn insert_organization(&mut self, organization: &Organization)
        -> Result<(), ServiceError>;
    async fn set_organization_name(&mut self, id: Uuid, name: &str) -> Result<(), ServiceError>;

    // Groups
    async fn find_group(&mut self, id: Uuid) -> Result<Option<Group>, ServiceError>;
    async fn insert_group(&mut self, group: &Group) -> Result<(), ServiceError>;
    /// Deletes the group with its memberships and scope grants.
    async fn delete_group(&mut self, id: Uuid) -> Result<bool, ServiceError>;
    async fn list_groups_for_provider(
        &mut self,
        service_provider_id: Uuid,
    ) -> Result<Vec<Group>, ServiceError>;
    async fn list_groups_for_user(&mut self, user_id: Uuid) -> Result<Vec<Group>, ServiceError>;
    /// Groups on which `service_provider_id` holds a grant for the contract.
    async fn find_groups_by_contract(
        &mut self,
        service_provider_id: Uuid,
        contract_description: &str,
    ) -> Result<Vec<Group>, ServiceError>;

    // Memberships
    /// Locks and returns every membership row of the group.
    async fn lock_memberships(
        &mut self,
        group_id: Uuid,
    ) -> Result<Vec<GroupMembership>, ServiceError>;
    async fn find_membership(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupMembership>, ServiceError>;
    async fn insert_membership(&mut self, membership: &GroupMembership)
        -> Result<(), ServiceError>;
    async fn update_membership_role(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        role: GroupRole,
    ) -> Result<(), ServiceError>;
    async fn delete_membership(&mut self, group_id: Uuid, user_id: Uuid)
        -> Result<(), ServiceError>;
    async fn list_members(&mut self, group_id: Uuid) -> Result<Vec<MemberView>, ServiceError>;

    // Scope grants
    async fn find_scope_grant(
        &mut self,
        service_provider_id: Uuid,
        group_id: Uuid,
    ) -> Result<Option<ScopeGrant>, ServiceError>;
    /// Inserts or overwrites the grant keyed by (provider, group). Returns
    /// `true` when a new row was created.
    async fn upsert_scope_grant(&mut self, grant: &ScopeGrant) -> Result<bool, ServiceError>;
    async fn list_scope_grants(&mut self, group_id: Uuid) -> Result<Vec<ScopeGrant>, ServiceError>;

    // Service providers and accounts
    async fn find_service_provider(
        &mut self,
        id: Uuid,
    ) -> Result<Option<ServiceProvider>, ServiceError>;
    async fn find_service_provider_by_client_id(
        &mut self,
        oidc_client_id: &str,
    ) -> Result<Option<ServiceProvider>, ServiceError>;
    async fn insert_service_provider(
        &mut self,
        provider: &ServiceProvider,
    ) -> Result<(), ServiceError>;
    async fn find_service_account_by_client_id(
        &mut self,
        client_id: &str,
    ) -> Result<Option<ServiceAccount>, ServiceError>;
    async fn insert_service_account(&mut self, account: &ServiceAccount)
        -> Result<(), ServiceError>;

    // Audit log
    async fn insert_audit_event(&mut self, event: &AuditEvent) -> Result<(), ServiceError>;
    async fn list_audit_events(
        &mut self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEvent>, ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}
