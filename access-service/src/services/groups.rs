//! Group authorization engine: group, membership and role mutations and the
//! invariants over them.
//!
//! Every group keeps at least one admin membership. Checks that depend on the
//! admin count lock the group's membership rows before counting.

use crate::models::{
    normalize_email, Actor, AuditAction, AuditEvent, AuditFilter, Group, GroupMembership,
    GroupRole, MemberView, NewAuditEvent, Organization, ScopeGrant, ScopeGrantInput, Siret, User,
};
use crate::services::email::{Notification, Notifier};
use crate::services::jobs::BackgroundJobs;
use crate::services::metrics::INVARIANT_REJECTIONS_TOTAL;
use crate::services::registry::OrganizationRegistry;
use crate::services::scopes;
use crate::services::store::{AccessStore, StoreTx};
use crate::services::ServiceError;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Input of [`GroupEngine::create_group`].
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub organization_siret: String,
    pub admin_email: String,
    /// Grant written for the acting provider.
    pub scope_grant: Option<ScopeGrantInput>,
    pub extra_members: Vec<String>,
    /// Notify added members once committed.
    pub notify: bool,
}

/// How a member is referenced by [`GroupEngine::add_user`].
#[derive(Debug, Clone)]
pub enum MemberRef {
    Email(String),
    UserId(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Manage,
}

/// Group with everything a caller may see about it.
#[derive(Debug, Clone)]
pub struct GroupDetail {
    pub group: Group,
    pub organization: Option<Organization>,
    pub members: Vec<MemberView>,
    pub scope_grants: Vec<ScopeGrant>,
}

/// Result of creating a group inside a caller-owned transaction. Side
/// effects are scheduled with [`GroupEngine::after_create`] once committed.
#[derive(Debug, Clone)]
pub struct CreatedGroup {
    pub group: Group,
    pub admin: User,
    unnamed_organization: Option<(Uuid, Siret)>,
    added_emails: Vec<String>,
}

#[derive(Clone)]
pub struct GroupEngine {
    store: Arc<dyn AccessStore>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<dyn OrganizationRegistry>,
    jobs: BackgroundJobs,
}

fn invariant_rejection(operation: &'static str, message: &str) -> ServiceError {
    INVARIANT_REJECTIONS_TOTAL
        .with_label_values(&[operation])
        .inc();
    tracing::warn!(operation = operation, "{}", message);
    ServiceError::Forbidden(message.to_string())
}

fn admin_count(memberships: &[GroupMembership]) -> usize {
    memberships.iter().filter(|m| m.is_admin()).count()
}

/// Find the account for `email`, creating an unverified one if absent.
async fn resolve_user(tx: &mut dyn StoreTx, email: &str) -> Result<(User, bool), ServiceError> {
    let email = normalize_email(email);
    if email.is_empty() || !email.contains('@') {
        return Err(ServiceError::Validation(format!("Invalid email '{}'", email)));
    }
    if let Some(user) = tx.find_user_by_email(&email).await? {
        return Ok((user, false));
    }
    let user = User::new(&email);
    tx.insert_user(&user).await?;
    Ok((user, true))
}

async fn resolve_organization(
    tx: &mut dyn StoreTx,
    siret: &Siret,
) -> Result<Organization, ServiceError> {
    if let Some(organization) = tx.find_organization_by_siret(siret.as_str()).await? {
        return Ok(organization);
    }
    let organization = Organization::new(siret);
    tx.insert_organization(&organization).await?;
    Ok(organization)
}

/// Fails `NotFound` for an unknown or unpaired subject and `Forbidden`
/// unless the subject is an admin member of the group.
pub async fn is_admin(
    tx: &mut dyn StoreTx,
    acting_subject: &str,
    group_id: Uuid,
) -> Result<(), ServiceError> {
    let user = tx
        .find_user_by_subject(acting_subject)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User is not paired".to_string()))?;

    match tx.find_membership(group_id, user.id).await? {
        Some(membership) if membership.is_admin() => Ok(()),
        _ => Err(ServiceError::Forbidden(
            "User is not an admin of this group".to_string(),
        )),
    }
}

impl GroupEngine {
    pub fn new(
        store: Arc<dyn AccessStore>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<dyn OrganizationRegistry>,
        jobs: BackgroundJobs,
    ) -> Self {
        Self {
            store,
            notifier,
            registry,
            jobs,
        }
    }

    pub fn store(&self) -> &Arc<dyn AccessStore> {
        &self.store
    }

    /// Load the group and check the actor may act on it.
    async fn authorize(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        group_id: Uuid,
        access: Access,
    ) -> Result<Group, ServiceError> {
        let group = tx
            .find_group(group_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Group {} not found", group_id)))?;

        match actor {
            Actor::Webhook => {}
            Actor::ServiceAccount {
                service_provider_id,
                ..
            } => {
                if tx
                    .find_scope_grant(*service_provider_id, group_id)
                    .await?
                    .is_none()
                {
                    return Err(ServiceError::Forbidden(
                        "Service provider holds no grant on this group".to_string(),
                    ));
                }
            }
            Actor::EndUser { acting_subject, .. } => match access {
                Access::Manage => is_admin(tx, acting_subject, group_id).await?,
                Access::Read => {
                    let user = tx
                        .find_user_by_subject(acting_subject)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound("User is not paired".to_string()))?;
                    if tx.find_membership(group_id, user.id).await?.is_none() {
                        return Err(ServiceError::Forbidden(
                            "User is not a member of this group".to_string(),
                        ));
                    }
                }
            },
        }

        Ok(group)
    }

    /// Create a group with its admin in one transaction.
    #[instrument(skip(self, actor, request), fields(actor = actor.kind()))]
    pub async fn create_group(
        &self,
        actor: &Actor,
        request: NewGroup,
    ) -> Result<CreatedGroup, ServiceError> {
        let notify = request.notify;
        let mut tx = self.store.begin().await?;
        let created = self.create_group_in(tx.as_mut(), actor, request).await?;
        tx.commit().await?;

        self.after_create(&created, notify);
        Ok(created)
    }

    /// Group creation steps, run inside the caller's transaction.
    pub async fn create_group_in(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        request: NewGroup,
    ) -> Result<CreatedGroup, ServiceError> {
        if matches!(actor, Actor::EndUser { .. }) {
            return Err(ServiceError::Forbidden(
                "End users cannot create groups".to_string(),
            ));
        }

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::Validation("Group name is required".to_string()));
        }
        let siret = Siret::parse(&request.organization_siret).map_err(ServiceError::Validation)?;

        let organization = resolve_organization(tx, &siret).await?;
        let (admin, _) = resolve_user(tx, &request.admin_email).await?;

        let group = Group::new(name, organization.id);
        tx.insert_group(&group).await?;

        let created_event = NewAuditEvent::new(actor, AuditAction::GroupCreated, group.id)
            .group(group.id)
            .snapshot(&json!({
                "name": group.name,
                "organization_siret": organization.siret,
                "admin_email": admin.email,
            }));
        tx.insert_audit_event(&created_event.into_event()).await?;

        self.insert_member(tx, actor, &group, &admin, GroupRole::Admin)
            .await?;
        let mut added_emails = vec![admin.email.clone()];

        if let Some(input) = request.scope_grant {
            scopes::update_or_create(tx, actor, actor.service_provider_id(), group.id, input)
                .await?;
        }

        for email in &request.extra_members {
            let email = normalize_email(email);
            if added_emails.contains(&email) {
                continue;
            }
            let (user, _) = resolve_user(tx, &email).await?;
            self.insert_member(tx, actor, &group, &user, GroupRole::Member)
                .await?;
            added_emails.push(email);
        }

        tracing::info!(
            group_id = %group.id,
            organization_id = %organization.id,
            members = added_emails.len(),
            "Group created"
        );

        Ok(CreatedGroup {
            group,
            admin,
            unnamed_organization: organization.name.is_none().then_some((organization.id, siret)),
            added_emails,
        })
    }

    /// Schedule the post-commit effects of a group creation.
    pub fn after_create(&self, created: &CreatedGroup, notify: bool) {
        if let Some((organization_id, siret)) = &created.unnamed_organization {
            self.schedule_enrichment(*organization_id, siret.clone());
        }
        if notify {
            for email in &created.added_emails {
                self.schedule_notification(Notification::AddedToGroup {
                    email: email.clone(),
                    group_name: created.group.name.clone(),
                });
            }
        }
    }

    async fn insert_member(
        &self,
        tx: &mut dyn StoreTx,
        actor: &Actor,
        group: &Group,
        user: &User,
        role: GroupRole,
    ) -> Result<MemberView, ServiceError> {
        tx.insert_membership(&GroupMembership::new(group.id, user.id, role))
            .await?;

        let event = NewAuditEvent::new(actor, AuditAction::MemberAdded, user.id)
            .group(group.id)
            .user(user.id)
            .snapshot(&json!({ "email": user.email, "role": role.as_str() }));
        tx.insert_audit_event(&event.into_event()).await?;

        Ok(MemberView {
            user_id: user.id,
            email: user.email.clone(),
            verified: user.verified,
            role_id: role.id(),
        })
    }

    #[instrument(skip(self, actor, member), fields(actor = actor.kind(), group_id = %group_id))]
    pub async fn add_user(
        &self,
        actor: &Actor,
        group_id: Uuid,
        member: MemberRef,
        role: GroupRole,
    ) -> Result<MemberView, ServiceError> {
        let mut tx = self.store.begin().await?;
        let group = self
            .authorize(tx.as_mut(), actor, group_id, Access::Manage)
            .await?;

        let user = match member {
            MemberRef::Email(email) => resolve_user(tx.as_mut(), &email).await?.0,
            MemberRef::UserId(user_id) => tx
                .find_user_by_id(user_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?,
        };

        if tx.find_membership(group_id, user.id).await?.is_some() {
            return Err(ServiceError::Conflict(
                "User is already a member of this group".to_string(),
            ));
        }

        let member = self
            .insert_member(tx.as_mut(), actor, &group, &user, role)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, role = role.as_str(), "Member added");
        self.schedule_notification(Notification::AddedToGroup {
            email: user.email,
            group_name: group.name,
        });
        Ok(member)
    }

    #[instrument(skip(self, actor), fields(actor = actor.kind(), group_id = %group_id, user_id = %user_id))]
    pub async fn remove_user(
        &self,
        actor: &Actor,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        let group = self
            .authorize(tx.as_mut(), actor, group_id, Access::Manage)
            .await?;

        let memberships = tx.lock_memberships(group_id).await?;
        let target = memberships
            .iter()
            .find(|m| m.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("User is not a member of this group".to_string()))?;

        if target.is_admin() && admin_count(&memberships) == 1 {
            return Err(invariant_rejection(
                "remove_user",
                "Cannot remove the last admin of a group",
            ));
        }

        tx.delete_membership(group_id, user_id).await?;

        let event = NewAuditEvent::new(actor, AuditAction::MemberRemoved, user_id)
            .group(group_id)
            .user(user_id)
            .snapshot(&json!({ "role": target.role().as_str(), "removed": true }));
        tx.insert_audit_event(&event.into_event()).await?;

        let user = tx.find_user_by_id(user_id).await?;
        tx.commit().await?;

        tracing::info!("Member removed");
        if let Some(user) = user {
            self.schedule_notification(Notification::RemovedFromGroup {
                email: user.email,
                group_name: group.name,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, actor), fields(actor = actor.kind(), group_id = %group_id, user_id = %user_id))]
    pub async fn update_user_role(
        &self,
        actor: &Actor,
        group_id: Uuid,
        user_id: Uuid,
        new_role: GroupRole,
    ) -> Result<MemberView, ServiceError> {
        let mut tx = self.store.begin().await?;
        let group = self
            .authorize(tx.as_mut(), actor, group_id, Access::Manage)
            .await?;

        let memberships = tx.lock_memberships(group_id).await?;
        let target = memberships
            .iter()
            .find(|m| m.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("User is not a member of this group".to_string()))?;

        if target.is_admin() && !new_role.is_admin() && admin_count(&memberships) == 1 {
            return Err(invariant_rejection(
                "update_user_role",
                "Cannot demote the last admin of a group",
            ));
        }

        let user = tx
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let view = MemberView {
            user_id,
            email: user.email.clone(),
            verified: user.verified,
            role_id: new_role.id(),
        };

        if target.role() == new_role {
            return Ok(view);
        }

        tx.update_membership_role(group_id, user_id, new_role)
            .await?;

        let event = NewAuditEvent::new(actor, AuditAction::MemberRoleUpdated, user_id)
            .group(group_id)
            .user(user_id)
            .snapshot(&json!({
                "previous_role": target.role().as_str(),
                "role": new_role.as_str(),
            }));
        tx.insert_audit_event(&event.into_event()).await?;
        tx.commit().await?;

        tracing::info!(role = new_role.as_str(), "Member role updated");
        self.schedule_notification(Notification::RoleChanged {
            email: user.email,
            group_name: group.name,
            role: new_role.as_str().to_string(),
        });
        Ok(view)
    }

    /// Read a group. Grants of other providers are hidden from provider
    /// actors.
    pub async fn get_group(&self, actor: &Actor, group_id: Uuid) -> Result<GroupDetail, ServiceError> {
        let mut tx = self.store.begin().await?;
        let group = self
            .authorize(tx.as_mut(), actor, group_id, Access::Read)
            .await?;

        let organization = tx.find_organization(group.organization_id).await?;
        let members = tx.list_members(group_id).await?;
        let mut scope_grants = tx.list_scope_grants(group_id).await?;
        if !matches!(actor, Actor::Webhook) {
            let provider = actor.service_provider_id();
            scope_grants.retain(|g| g.service_provider_id == provider);
        }

        Ok(GroupDetail {
            group,
            organization,
            members,
            scope_grants,
        })
    }

    /// Groups visible to the actor: those its provider holds a grant on, or
    /// for end users, those they belong to.
    pub async fn list_groups(&self, actor: &Actor) -> Result<Vec<Group>, ServiceError> {
        let mut tx = self.store.begin().await?;
        match actor {
            Actor::EndUser { acting_subject, .. } => {
                match tx.find_user_by_subject(acting_subject).await? {
                    Some(user) => tx.list_groups_for_user(user.id).await,
                    None => Ok(Vec::new()),
                }
            }
            _ => tx.list_groups_for_provider(actor.service_provider_id()).await,
        }
    }

    #[instrument(skip(self, actor), fields(actor = actor.kind(), group_id = %group_id))]
    pub async fn delete_group(&self, actor: &Actor, group_id: Uuid) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        let group = self
            .authorize(tx.as_mut(), actor, group_id, Access::Manage)
            .await?;

        tx.delete_group(group_id).await?;

        let event = NewAuditEvent::new(actor, AuditAction::GroupDeleted, group_id)
            .group(group_id)
            .snapshot(&group);
        tx.insert_audit_event(&event.into_event()).await?;
        tx.commit().await?;

        tracing::info!("Group deleted");
        Ok(())
    }

    /// Create or update the acting provider's grant on a group.
    ///
    /// A service account may only update a grant its provider already holds;
    /// a group admin signed in through a provider may grant that provider.
    #[instrument(skip(self, actor, input), fields(actor = actor.kind(), group_id = %group_id))]
    pub async fn put_scopes(
        &self,
        actor: &Actor,
        group_id: Uuid,
        input: ScopeGrantInput,
    ) -> Result<(ScopeGrant, bool), ServiceError> {
        if matches!(actor, Actor::Webhook) {
            return Err(ServiceError::Forbidden(
                "Webhook grants are written by contract provisioning".to_string(),
            ));
        }
        if input.contract_description.trim().is_empty() {
            return Err(ServiceError::Validation(
                "contract_description is required".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        self.authorize(tx.as_mut(), actor, group_id, Access::Manage)
            .await?;

        let result = scopes::update_or_create(
            tx.as_mut(),
            actor,
            actor.service_provider_id(),
            group_id,
            input,
        )
        .await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn list_audit_events(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.list_audit_events(filter).await
    }

    fn schedule_notification(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        self.jobs.spawn("group_notification", move || {
            let notifier = notifier.clone();
            let notification = notification.clone();
            async move { notifier.send(&notification).await }
        });
    }

    fn schedule_enrichment(&self, organization_id: Uuid, siret: Siret) {
        let registry = self.registry.clone();
        let store = self.store.clone();
        self.jobs.spawn("organization_enrichment", move || {
            let registry = registry.clone();
            let store = store.clone();
            let siret = siret.clone();
            async move {
                let Some(name) = registry.lookup_name(&siret).await? else {
                    tracing::info!(siret = %siret, "Registry has no name for organization");
                    return Ok(());
                };
                let mut tx = store.begin().await?;
                tx.set_organization_name(organization_id, &name).await?;
                tx.commit().await?;
                tracing::info!(organization_id = %organization_id, "Organization name enriched");
                Ok(())
            }
        });
    }
}
