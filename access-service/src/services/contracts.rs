//! Provisioning of groups from approved contracts delivered by webhook.
//!
//! A contract maps to exactly one group: the group on which the webhook
//! provider holds a grant whose `contract_description` is the contract id.
//! Concurrent first deliveries race on the organization, the applicant's
//! account and the partial unique index on webhook grants. Whichever insert
//! loses raises a `UniqueViolation`, and resolution is retried in a fresh
//! transaction that sees the winner's rows.

use crate::models::{
    Actor, ContractData, GroupRole, ScopeGrantInput, WebhookEnvelope, WEBHOOK_PROVIDER_ID,
};
use crate::services::email::{Notification, Notifier};
use crate::services::groups::{CreatedGroup, GroupEngine, NewGroup};
use crate::services::jobs::BackgroundJobs;
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::scopes;
use crate::services::store::{constraints, StoreTx};
use crate::services::ServiceError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const MAX_RESOLUTION_ATTEMPTS: u32 = 3;

/// Constraints a concurrent delivery of the same contract can trip.
const RACE_CONSTRAINTS: [&str; 3] = [
    constraints::WEBHOOK_CONTRACT,
    constraints::ORGANIZATION_SIRET,
    constraints::USER_EMAIL,
];

fn lost_race(e: &ServiceError) -> bool {
    RACE_CONSTRAINTS
        .iter()
        .any(|constraint| e.is_unique_violation_on(constraint))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Known event that does not provision, e.g. a contract not yet validated.
    Ignored { reason: String },
    Provisioned {
        group_id: Uuid,
        group_created: bool,
        grant_created: bool,
    },
}

#[derive(Debug, Clone)]
struct Resolution {
    group_id: Uuid,
    group_name: String,
    group_created: bool,
    grant_created: bool,
    unverified_admin: Option<String>,
    pending_create: Option<CreatedGroup>,
}

#[derive(Clone)]
pub struct ContractEngine {
    groups: GroupEngine,
    notifier: Arc<dyn Notifier>,
    jobs: BackgroundJobs,
    contracts_base_url: String,
}

fn record(outcome: &'static str) {
    WEBHOOK_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

impl ContractEngine {
    pub fn new(
        groups: GroupEngine,
        notifier: Arc<dyn Notifier>,
        jobs: BackgroundJobs,
        contracts_base_url: &str,
    ) -> Self {
        Self {
            groups,
            notifier,
            jobs,
            contracts_base_url: contracts_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Handle one verified delivery on behalf of `target_provider_id`.
    #[instrument(
        skip(self, envelope),
        fields(event = %envelope.event, event_id = ?envelope.event_id, target = %target_provider_id)
    )]
    pub async fn handle(
        &self,
        target_provider_id: Uuid,
        envelope: &WebhookEnvelope,
    ) -> Result<ProvisionOutcome, ServiceError> {
        if !envelope.is_supported() {
            record("rejected");
            tracing::warn!(model_type = %envelope.model_type, "Unsupported webhook event");
            return Err(ServiceError::Forbidden(format!(
                "Unsupported event '{}' for model '{}'",
                envelope.event, envelope.model_type
            )));
        }

        if !envelope.is_validated() {
            record("ignored");
            tracing::info!(state = ?envelope.state(), "Contract not validated, ignoring");
            return Ok(ProvisionOutcome::Ignored {
                reason: format!(
                    "Contract state '{}' does not provision access",
                    envelope.state().unwrap_or("unknown")
                ),
            });
        }

        let contract = envelope.contract().map_err(|e| {
            record("rejected");
            ServiceError::Validation(format!("Malformed contract payload: {}", e))
        })?;

        match self.provision(target_provider_id, &contract).await {
            Ok(outcome) => {
                record("provisioned");
                Ok(outcome)
            }
            Err(e @ ServiceError::Conflict(_)) => {
                record("conflict");
                Err(e)
            }
            Err(e) => {
                record("error");
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        target_provider_id: Uuid,
        contract: &ContractData,
    ) -> Result<ProvisionOutcome, ServiceError> {
        if target_provider_id == WEBHOOK_PROVIDER_ID {
            return Err(ServiceError::Validation(
                "Target service provider cannot be the webhook identity".to_string(),
            ));
        }

        let mut attempt = 1;
        let resolution = loop {
            match self.resolve_once(target_provider_id, contract).await {
                Ok(resolution) => break resolution,
                Err(e) if lost_race(&e) && attempt < MAX_RESOLUTION_ATTEMPTS => {
                    tracing::warn!(
                        contract_id = %contract.id,
                        attempt = attempt,
                        error = %e,
                        "Contract provisioned concurrently, resolving again"
                    );
                    attempt += 1;
                }
                Err(e) if lost_race(&e) => {
                    return Err(ServiceError::Conflict(format!(
                        "Contract {} could not be resolved to a single group",
                        contract.id
                    )));
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(created) = &resolution.pending_create {
            self.groups.after_create(created, false);
        }
        if let Some(email) = resolution.unverified_admin {
            self.schedule_confirmation(Notification::ConfirmAdmin {
                email,
                group_name: resolution.group_name,
                contract_url: self.contract_url(contract),
            });
        }

        tracing::info!(
            contract_id = %contract.id,
            group_id = %resolution.group_id,
            group_created = resolution.group_created,
            "Contract provisioned"
        );

        Ok(ProvisionOutcome::Provisioned {
            group_id: resolution.group_id,
            group_created: resolution.group_created,
            grant_created: resolution.grant_created,
        })
    }

    /// One full resolution in its own transaction.
    async fn resolve_once(
        &self,
        target_provider_id: Uuid,
        contract: &ContractData,
    ) -> Result<Resolution, ServiceError> {
        let actor = Actor::Webhook;
        let mut tx = self.groups.store().begin().await?;

        if tx.find_service_provider(target_provider_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Service provider {} not found",
                target_provider_id
            )));
        }

        let grant = self.grant_input(contract);
        let mut matches = tx
            .find_groups_by_contract(WEBHOOK_PROVIDER_ID, &contract.id)
            .await?;

        let mut resolution = match matches.len() {
            0 => {
                let created = self
                    .groups
                    .create_group_in(
                        tx.as_mut(),
                        &actor,
                        NewGroup {
                            name: self.group_name(contract),
                            organization_siret: contract.organization.siret.clone(),
                            admin_email: contract.applicant.email.clone(),
                            scope_grant: Some(grant.clone()),
                            extra_members: Vec::new(),
                            notify: false,
                        },
                    )
                    .await?;
                Resolution {
                    group_id: created.group.id,
                    group_name: created.group.name.clone(),
                    group_created: true,
                    grant_created: false,
                    unverified_admin: (!created.admin.verified).then(|| created.admin.email.clone()),
                    pending_create: Some(created),
                }
            }
            1 => {
                let group = matches.remove(0);
                let unverified_admin = unverified_admin(tx.as_mut(), group.id).await?;
                Resolution {
                    group_id: group.id,
                    group_name: group.name,
                    group_created: false,
                    grant_created: false,
                    unverified_admin,
                    pending_create: None,
                }
            }
            n => {
                tracing::error!(contract_id = %contract.id, groups = n, "Contract matches several groups");
                return Err(ServiceError::Conflict(format!(
                    "Contract {} matches {} groups",
                    contract.id, n
                )));
            }
        };

        let (_, grant_created) = scopes::update_or_create(
            tx.as_mut(),
            &actor,
            target_provider_id,
            resolution.group_id,
            grant,
        )
        .await?;
        resolution.grant_created = grant_created;

        tx.commit().await?;
        Ok(resolution)
    }

    fn grant_input(&self, contract: &ContractData) -> ScopeGrantInput {
        ScopeGrantInput {
            scopes: contract.scopes.clone(),
            contract_description: contract.id.clone(),
            contract_url: self.contract_url(contract),
        }
    }

    fn contract_url(&self, contract: &ContractData) -> String {
        match contract.url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.to_string(),
            _ => format!("{}/{}", self.contracts_base_url, contract.id),
        }
    }

    fn group_name(&self, contract: &ContractData) -> String {
        let name = contract.intitule.trim();
        if name.is_empty() {
            format!("Contract {}", contract.id)
        } else {
            name.to_string()
        }
    }

    fn schedule_confirmation(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        self.jobs.spawn("admin_confirmation", move || {
            let notifier = notifier.clone();
            let notification = notification.clone();
            async move { notifier.send(&notification).await }
        });
    }
}

/// Email of the group's first unverified admin, if every admin is unverified.
async fn unverified_admin(
    tx: &mut dyn StoreTx,
    group_id: Uuid,
) -> Result<Option<String>, ServiceError> {
    let admins: Vec<_> = tx
        .list_members(group_id)
        .await?
        .into_iter()
        .filter(|m| m.role() == GroupRole::Admin)
        .collect();

    if admins.iter().any(|m| m.verified) {
        return Ok(None);
    }
    Ok(admins.into_iter().next().map(|m| m.email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceProvider;
    use crate::services::email::RecordingNotifier;
    use crate::services::registry::StaticOrganizationRegistry;
    use crate::services::store::AccessStore;
    use crate::services::{InMemoryStore, StaleLookup};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryStore,
        notifier: Arc<RecordingNotifier>,
        jobs: BackgroundJobs,
        engine: ContractEngine,
        provider_id: Uuid,
    }

    async fn fixture(store: InMemoryStore) -> Fixture {
        let provider = ServiceProvider::new("Portail".to_string(), Some("portal-client".to_string()));
        let mut tx = store.begin().await.unwrap();
        tx.insert_service_provider(&provider).await.unwrap();
        tx.commit().await.unwrap();

        let notifier = Arc::new(RecordingNotifier::new());
        let jobs = BackgroundJobs::with_policy(Duration::ZERO, 3);
        let groups = GroupEngine::new(
            Arc::new(store.clone()),
            notifier.clone(),
            Arc::new(StaticOrganizationRegistry::new()),
            jobs.clone(),
        );
        let engine = ContractEngine::new(
            groups,
            notifier.clone(),
            jobs.clone(),
            "https://contracts.example/",
        );
        Fixture {
            store,
            notifier,
            jobs,
            engine,
            provider_id: provider.id,
        }
    }

    fn delivery(event_id: &str, state: &str) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "event": "approve",
            "event_id": event_id,
            "fired_at": 1700000000,
            "model_type": "authorization_request",
            "data": {
                "id": "9001",
                "state": state,
                "intitule": "Portail RH",
                "organization": { "siret": "21920023500014" },
                "applicant": { "email": "alice@example.fr" },
                "scopes": ["openid", "profile"]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_delivery_reuses_group() {
        let f = fixture(InMemoryStore::new()).await;

        let first = f
            .engine
            .handle(f.provider_id, &delivery("evt-1", "validated"))
            .await
            .unwrap();
        let second = f
            .engine
            .handle(f.provider_id, &delivery("evt-2", "validated"))
            .await
            .unwrap();

        let (
            ProvisionOutcome::Provisioned {
                group_id: first_id,
                group_created: true,
                grant_created: true,
            },
            ProvisionOutcome::Provisioned {
                group_id: second_id,
                group_created: false,
                grant_created: false,
            },
        ) = (first, second)
        else {
            panic!("unexpected outcomes");
        };
        assert_eq!(first_id, second_id);
        assert_eq!(f.store.groups().await.len(), 1);

        let grants = f.store.scope_grants().await;
        assert_eq!(grants.len(), 2);
        assert!(grants
            .iter()
            .all(|g| g.contract_url == "https://contracts.example/9001"));

        f.jobs.drain().await;
        let sent = f.notifier.sent().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|n| matches!(n, Notification::ConfirmAdmin { .. })));
    }

    #[tokio::test]
    async fn test_lost_race_recovers_to_existing_group() {
        let f = fixture(InMemoryStore::new()).await;
        let ProvisionOutcome::Provisioned { group_id, .. } = f
            .engine
            .handle(f.provider_id, &delivery("evt-1", "validated"))
            .await
            .unwrap()
        else {
            panic!("expected provisioning");
        };

        let stale = f.store.clone().with_stale_reads(StaleLookup::Contract, 1);
        let retried = f
            .engine
            .handle(f.provider_id, &delivery("evt-2", "validated"))
            .await
            .unwrap();
        assert_eq!(
            retried,
            ProvisionOutcome::Provisioned {
                group_id,
                group_created: false,
                grant_created: false,
            }
        );
        assert_eq!(stale.groups().await.len(), 1);
    }

    async fn redeliver_after_race(f: &Fixture, group_id: Uuid) {
        let retried = f
            .engine
            .handle(f.provider_id, &delivery("evt-2", "validated"))
            .await
            .unwrap();
        assert_eq!(
            retried,
            ProvisionOutcome::Provisioned {
                group_id,
                group_created: false,
                grant_created: false,
            }
        );
        assert_eq!(f.store.groups().await.len(), 1);
        assert_eq!(f.store.organizations().await.len(), 1);
        assert_eq!(f.store.users().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_organization_race_recovers() {
        let f = fixture(InMemoryStore::new()).await;
        let ProvisionOutcome::Provisioned { group_id, .. } = f
            .engine
            .handle(f.provider_id, &delivery("evt-1", "validated"))
            .await
            .unwrap()
        else {
            panic!("expected provisioning");
        };

        f.store
            .clone()
            .with_stale_reads(StaleLookup::Contract, 1)
            .with_stale_reads(StaleLookup::OrganizationSiret, 1);
        redeliver_after_race(&f, group_id).await;
    }

    #[tokio::test]
    async fn test_lost_applicant_race_recovers() {
        let f = fixture(InMemoryStore::new()).await;
        let ProvisionOutcome::Provisioned { group_id, .. } = f
            .engine
            .handle(f.provider_id, &delivery("evt-1", "validated"))
            .await
            .unwrap()
        else {
            panic!("expected provisioning");
        };

        f.store
            .clone()
            .with_stale_reads(StaleLookup::Contract, 1)
            .with_stale_reads(StaleLookup::UserEmail, 1);
        redeliver_after_race(&f, group_id).await;
    }

    #[tokio::test]
    async fn test_persistent_race_is_a_conflict() {
        let f = fixture(InMemoryStore::new()).await;
        f.engine
            .handle(f.provider_id, &delivery("evt-1", "validated"))
            .await
            .unwrap();

        f.store
            .clone()
            .with_stale_reads(StaleLookup::Contract, MAX_RESOLUTION_ATTEMPTS as usize);
        let result = f
            .engine
            .handle(f.provider_id, &delivery("evt-2", "validated"))
            .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(f.store.groups().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unvalidated_contract_is_ignored() {
        let f = fixture(InMemoryStore::new()).await;
        let outcome = f
            .engine
            .handle(f.provider_id, &delivery("evt-1", "submitted"))
            .await
            .unwrap();
        assert!(matches!(outcome, ProvisionOutcome::Ignored { .. }));
        assert!(f.store.groups().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_sentinel_targets() {
        let f = fixture(InMemoryStore::new()).await;
        let unknown = f
            .engine
            .handle(Uuid::new_v4(), &delivery("evt-1", "validated"))
            .await;
        assert!(matches!(unknown, Err(ServiceError::NotFound(_))));

        let sentinel = f
            .engine
            .handle(WEBHOOK_PROVIDER_ID, &delivery("evt-1", "validated"))
            .await;
        assert!(matches!(sentinel, Err(ServiceError::Validation(_))));
        assert!(f.store.groups().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_model_is_forbidden() {
        let f = fixture(InMemoryStore::new()).await;
        let mut envelope = delivery("evt-1", "validated");
        envelope.model_type = "habilitation".to_string();
        let result = f.engine.handle(f.provider_id, &envelope).await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }
}
