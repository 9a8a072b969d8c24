//! In-memory store with the same constraint semantics as PostgreSQL.
//!
//! A transaction holds the store lock for its lifetime and works on a copy of
//! the state; `commit` publishes the copy, dropping discards it. Transactions
//! are therefore serialized.

use crate::models::{
    AuditEvent, AuditFilter, Group, GroupMembership, GroupRole, MemberView, Organization,
    ScopeGrant, ServiceAccount, ServiceProvider, User, WEBHOOK_PROVIDER_ID,
};
use crate::services::store::{constraints, AccessStore, StoreTx};
use crate::services::ServiceError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    organizations: HashMap<Uuid, Organization>,
    groups: HashMap<Uuid, Group>,
    memberships: Vec<GroupMembership>,
    scope_grants: Vec<ScopeGrant>,
    service_providers: HashMap<Uuid, ServiceProvider>,
    service_accounts: Vec<ServiceAccount>,
    audit_events: Vec<AuditEvent>,
}

impl MemoryState {
    fn seeded() -> Self {
        let mut state = Self::default();
        state.service_providers.insert(
            WEBHOOK_PROVIDER_ID,
            ServiceProvider {
                id: WEBHOOK_PROVIDER_ID,
                name: "contract-webhook".to_string(),
                oidc_client_id: None,
                created_at: Utc::now(),
            },
        );
        state
    }

    fn sorted_groups<'a>(&self, ids: impl Iterator<Item = &'a Uuid>) -> Vec<Group> {
        let mut groups: Vec<Group> = ids.filter_map(|id| self.groups.get(id).cloned()).collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        groups.dedup_by_key(|g| g.id);
        groups
    }
}

fn unique_violation(constraint: &str) -> ServiceError {
    ServiceError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key_violation(detail: &str) -> ServiceError {
    ServiceError::Internal(anyhow::anyhow!("Foreign key violation: {}", detail))
}

/// Lookup that [`InMemoryStore::with_stale_reads`] can make miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleLookup {
    Contract,
    OrganizationSiret,
    UserEmail,
}

#[derive(Debug, Default)]
struct StaleReads {
    contract: AtomicUsize,
    organization_siret: AtomicUsize,
    user_email: AtomicUsize,
}

impl StaleReads {
    fn counter(&self, lookup: StaleLookup) -> &AtomicUsize {
        match lookup {
            StaleLookup::Contract => &self.contract,
            StaleLookup::OrganizationSiret => &self.organization_siret,
            StaleLookup::UserEmail => &self.user_email,
        }
    }

    fn take(&self, lookup: StaleLookup) -> bool {
        self.counter(lookup)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    stale_reads: Arc<StaleReads>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::seeded())),
            stale_reads: Arc::new(StaleReads::default()),
        }
    }

    /// The next `reads` lookups of kind `lookup` report no match, as a
    /// transaction racing a concurrent writer would before its insert fails.
    pub fn with_stale_reads(self, lookup: StaleLookup, reads: usize) -> Self {
        self.stale_reads.counter(lookup).store(reads, Ordering::SeqCst);
        self
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.values().cloned().collect()
    }

    pub async fn groups(&self) -> Vec<Group> {
        let state = self.state.lock().await;
        state.sorted_groups(state.groups.keys())
    }

    pub async fn memberships(&self, group_id: Uuid) -> Vec<GroupMembership> {
        self.state
            .lock()
            .await
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect()
    }

    pub async fn scope_grants(&self) -> Vec<ScopeGrant> {
        self.state.lock().await.scope_grants.clone()
    }

    pub async fn organizations(&self) -> Vec<Organization> {
        self.state
            .lock()
            .await
            .organizations
            .values()
            .cloned()
            .collect()
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().await.audit_events.clone()
    }
}

#[async_trait]
impl AccessStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            stale_reads: self.stale_reads.clone(),
        }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    stale_reads: Arc<StaleReads>,
}

impl MemoryTx {

    fn check_webhook_contract(&self, grant: &ScopeGrant) -> Result<(), ServiceError> {
        if grant.service_provider_id != WEBHOOK_PROVIDER_ID {
            return Ok(());
        }
        let taken = self.working.scope_grants.iter().any(|g| {
            g.service_provider_id == WEBHOOK_PROVIDER_ID
                && g.group_id != grant.group_id
                && g.contract_description == grant.contract_description
        });
        if taken {
            return Err(unique_violation(constraints::WEBHOOK_CONTRACT));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, ServiceError> {
        if self.stale_reads.take(StaleLookup::UserEmail) {
            return Ok(None);
        }
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_subject(&mut self, sub: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.sub.as_deref() == Some(sub))
            .cloned())
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), ServiceError> {
        let users = &self.working.users;
        if users.values().any(|u| u.email == user.email) {
            return Err(unique_violation(constraints::USER_EMAIL));
        }
        if let Some(sub) = &user.sub {
            if users.values().any(|u| u.sub.as_ref() == Some(sub)) {
                return Err(unique_violation(constraints::USER_SUBJECT));
            }
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn bind_subject_if_unset(
        &mut self,
        user_id: Uuid,
        sub: &str,
    ) -> Result<bool, ServiceError> {
        let unbound = matches!(self.working.users.get(&user_id), Some(u) if u.sub.is_none());
        if !unbound {
            return Ok(false);
        }
        if self
            .working
            .users
            .values()
            .any(|u| u.id != user_id && u.sub.as_deref() == Some(sub))
        {
            return Err(unique_violation(constraints::USER_SUBJECT));
        }
        if let Some(user) = self.working.users.get_mut(&user_id) {
            user.sub = Some(sub.to_string());
            user.verified = true;
        }
        Ok(true)
    }

    async fn find_organization(&mut self, id: Uuid) -> Result<Option<Organization>, ServiceError> {
        Ok(self.working.organizations.get(&id).cloned())
    }

    async fn find_organization_by_siret(
        &mut self,
        siret: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        if self.stale_reads.take(StaleLookup::OrganizationSiret) {
            return Ok(None);
        }
        Ok(self
            .working
            .organizations
            .values()
            .find(|o| o.siret == siret)
            .cloned())
    }

    async fn insert_organization(
        &mut self,
        organization: &Organization,
    ) -> Result<(), ServiceError> {
        if self
            .working
            .organizations
            .values()
            .any(|o| o.siret == organization.siret)
        {
            return Err(unique_violation(constraints::ORGANIZATION_SIRET));
        }
        self.working
            .organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    async fn set_organization_name(&mut self, id: Uuid, name: &str) -> Result<(), ServiceError> {
        if let Some(organization) = self.working.organizations.get_mut(&id) {
            organization.name = Some(name.to_string());
        }
        Ok(())
    }

    async fn find_group(&mut self, id: Uuid) -> Result<Option<Group>, ServiceError> {
        Ok(self.working.groups.get(&id).cloned())
    }

    async fn insert_group(&mut self, group: &Group) -> Result<(), ServiceError> {
        if !self
            .working
            .organizations
            .contains_key(&group.organization_id)
        {
            return Err(foreign_key_violation("groups.organization_id"));
        }
        self.working.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn delete_group(&mut self, id: Uuid) -> Result<bool, ServiceError> {
        if self.working.groups.remove(&id).is_none() {
            return Ok(false);
        }
        self.working.memberships.retain(|m| m.group_id != id);
        self.working.scope_grants.retain(|g| g.group_id != id);
        Ok(true)
    }

    async fn list_groups_for_provider(
        &mut self,
        service_provider_id: Uuid,
    ) -> Result<Vec<Group>, ServiceError> {
        let ids: Vec<Uuid> = self
            .working
            .scope_grants
            .iter()
            .filter(|g| g.service_provider_id == service_provider_id)
            .map(|g| g.group_id)
            .collect();
        Ok(self.working.sorted_groups(ids.iter()))
    }

    async fn list_groups_for_user(&mut self, user_id: Uuid) -> Result<Vec<Group>, ServiceError> {
        let ids: Vec<Uuid> = self
            .working
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.group_id)
            .collect();
        Ok(self.working.sorted_groups(ids.iter()))
    }

    async fn find_groups_by_contract(
        &mut self,
        service_provider_id: Uuid,
        contract_description: &str,
    ) -> Result<Vec<Group>, ServiceError> {
        if self.stale_reads.take(StaleLookup::Contract) {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = self
            .working
            .scope_grants
            .iter()
            .filter(|g| {
                g.service_provider_id == service_provider_id
                    && g.contract_description == contract_description
            })
            .map(|g| g.group_id)
            .collect();
        Ok(self.working.sorted_groups(ids.iter()))
    }

    async fn lock_memberships(
        &mut self,
        group_id: Uuid,
    ) -> Result<Vec<GroupMembership>, ServiceError> {
        Ok(self
            .working
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn find_membership(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupMembership>, ServiceError> {
        Ok(self
            .working
            .memberships
            .iter()
            .find(|m| m.group_id == group_id && m.user_id == user_id)
            .cloned())
    }

    async fn insert_membership(
        &mut self,
        membership: &GroupMembership,
    ) -> Result<(), ServiceError> {
        if GroupRole::from_id(membership.role_id).is_none() {
            return Err(foreign_key_violation("group_memberships.role_id"));
        }
        if !self.working.groups.contains_key(&membership.group_id) {
            return Err(foreign_key_violation("group_memberships.group_id"));
        }
        if !self.working.users.contains_key(&membership.user_id) {
            return Err(foreign_key_violation("group_memberships.user_id"));
        }
        if self
            .working
            .memberships
            .iter()
            .any(|m| m.group_id == membership.group_id && m.user_id == membership.user_id)
        {
            return Err(unique_violation(constraints::MEMBERSHIP));
        }
        self.working.memberships.push(membership.clone());
        Ok(())
    }

    async fn update_membership_role(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        role: GroupRole,
    ) -> Result<(), ServiceError> {
        if let Some(membership) = self
            .working
            .memberships
            .iter_mut()
            .find(|m| m.group_id == group_id && m.user_id == user_id)
        {
            membership.role_id = role.id();
        }
        Ok(())
    }

    async fn delete_membership(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.working
            .memberships
            .retain(|m| !(m.group_id == group_id && m.user_id == user_id));
        Ok(())
    }

    async fn list_members(&mut self, group_id: Uuid) -> Result<Vec<MemberView>, ServiceError> {
        let mut members: Vec<MemberView> = self
            .working
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id)
            .filter_map(|m| {
                self.working.users.get(&m.user_id).map(|u| MemberView {
                    user_id: u.id,
                    email: u.email.clone(),
                    verified: u.verified,
                    role_id: m.role_id,
                })
            })
            .collect();
        members.sort_by(|a, b| a.role_id.cmp(&b.role_id).then(a.email.cmp(&b.email)));
        Ok(members)
    }

    async fn find_scope_grant(
        &mut self,
        service_provider_id: Uuid,
        group_id: Uuid,
    ) -> Result<Option<ScopeGrant>, ServiceError> {
        Ok(self
            .working
            .scope_grants
            .iter()
            .find(|g| g.service_provider_id == service_provider_id && g.group_id == group_id)
            .cloned())
    }

    async fn upsert_scope_grant(&mut self, grant: &ScopeGrant) -> Result<bool, ServiceError> {
        if !self.working.groups.contains_key(&grant.group_id) {
            return Err(foreign_key_violation("scope_grants.group_id"));
        }
        if !self
            .working
            .service_providers
            .contains_key(&grant.service_provider_id)
        {
            return Err(foreign_key_violation("scope_grants.service_provider_id"));
        }
        self.check_webhook_contract(grant)?;

        match self.working.scope_grants.iter_mut().find(|g| {
            g.service_provider_id == grant.service_provider_id && g.group_id == grant.group_id
        }) {
            Some(existing) => {
                *existing = grant.clone();
                Ok(false)
            }
            None => {
                self.working.scope_grants.push(grant.clone());
                Ok(true)
            }
        }
    }

    async fn list_scope_grants(&mut self, group_id: Uuid) -> Result<Vec<ScopeGrant>, ServiceError> {
        let mut grants: Vec<ScopeGrant> = self
            .working
            .scope_grants
            .iter()
            .filter(|g| g.group_id == group_id)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.updated_at);
        Ok(grants)
    }

    async fn find_service_provider(
        &mut self,
        id: Uuid,
    ) -> Result<Option<ServiceProvider>, ServiceError> {
        Ok(self.working.service_providers.get(&id).cloned())
    }

    async fn find_service_provider_by_client_id(
        &mut self,
        oidc_client_id: &str,
    ) -> Result<Option<ServiceProvider>, ServiceError> {
        Ok(self
            .working
            .service_providers
            .values()
            .find(|p| p.oidc_client_id.as_deref() == Some(oidc_client_id))
            .cloned())
    }

    async fn insert_service_provider(
        &mut self,
        provider: &ServiceProvider,
    ) -> Result<(), ServiceError> {
        if let Some(client_id) = &provider.oidc_client_id {
            if self
                .working
                .service_providers
                .values()
                .any(|p| p.oidc_client_id.as_ref() == Some(client_id))
            {
                return Err(unique_violation(constraints::SERVICE_PROVIDER_CLIENT_ID));
            }
        }
        self.working
            .service_providers
            .insert(provider.id, provider.clone());
        Ok(())
    }

    async fn find_service_account_by_client_id(
        &mut self,
        client_id: &str,
    ) -> Result<Option<ServiceAccount>, ServiceError> {
        Ok(self
            .working
            .service_accounts
            .iter()
            .find(|a| a.client_id == client_id)
            .cloned())
    }

    async fn insert_service_account(
        &mut self,
        account: &ServiceAccount,
    ) -> Result<(), ServiceError> {
        if !self
            .working
            .service_providers
            .contains_key(&account.service_provider_id)
        {
            return Err(foreign_key_violation("service_accounts.service_provider_id"));
        }
        if self
            .working
            .service_accounts
            .iter()
            .any(|a| a.client_id == account.client_id)
        {
            return Err(unique_violation(constraints::SERVICE_ACCOUNT_CLIENT_ID));
        }
        self.working.service_accounts.push(account.clone());
        Ok(())
    }

    async fn insert_audit_event(&mut self, event: &AuditEvent) -> Result<(), ServiceError> {
        self.working.audit_events.push(event.clone());
        Ok(())
    }

    async fn list_audit_events(
        &mut self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        let mut events: Vec<AuditEvent> = self
            .working
            .audit_events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
