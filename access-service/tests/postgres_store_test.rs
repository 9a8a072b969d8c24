//! Runs the engines against a real PostgreSQL database.
//!
//! Set `TEST_DATABASE_URL` and run with `cargo test -- --ignored`.

mod common;

use access_service::models::{Actor, GroupRole, ScopeGrantInput, WebhookEnvelope};
use access_service::services::{
    BackgroundJobs, Database, MemberRef, NewGroup, ProvisionOutcome, RecordingNotifier,
    ServiceError,
};
use access_service::AppState;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn state() -> AppState {
    common::init_tracing();
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let db = Database::connect(&url, 5, 1, Duration::from_secs(5))
        .await
        .expect("Failed to connect");
    db.run_migrations().await.expect("Failed to migrate");

    common::build_state(
        Arc::new(db),
        Arc::new(RecordingNotifier::new()),
        BackgroundJobs::with_policy(Duration::ZERO, 3),
    )
}

async fn service_actor(state: &AppState) -> Actor {
    let provider = state
        .admin_service
        .create_service_provider(&format!("Portail {}", Uuid::new_v4()), None)
        .await
        .unwrap();
    let issued = state
        .admin_service
        .create_service_account(provider.id)
        .await
        .unwrap();
    Actor::ServiceAccount {
        service_provider_id: provider.id,
        service_account_id: issued.account.id,
    }
}

fn unique_email(name: &str) -> String {
    format!("{}-{}@example.fr", name, Uuid::new_v4().simple())
}

/// Random SIRET with a valid Luhn check digit, outside the La Poste SIREN.
fn unique_siret() -> String {
    let seed = Uuid::new_v4().as_u128();
    let payload: String = std::iter::once('9')
        .chain((0..12).map(|i| char::from(b'0' + ((seed >> (i * 8)) % 10) as u8)))
        .collect();
    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    format!("{}{}", payload, (10 - sum % 10) % 10)
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_last_admin_is_kept() {
    let state = state().await;
    let actor = service_actor(&state).await;
    let alice = unique_email("alice");
    let bob = unique_email("bob");

    let created = state
        .groups
        .create_group(
            &actor,
            NewGroup {
                name: "Portail RH".to_string(),
                organization_siret: common::SIRET.to_string(),
                admin_email: alice.clone(),
                scope_grant: Some(ScopeGrantInput {
                    scopes: vec!["openid".to_string()],
                    contract_description: "manual".to_string(),
                    contract_url: String::new(),
                }),
                extra_members: Vec::new(),
                notify: false,
            },
        )
        .await
        .unwrap();
    let group_id = created.group.id;

    let bob_view = state
        .groups
        .add_user(&actor, group_id, MemberRef::Email(bob), GroupRole::Member)
        .await
        .unwrap();

    let err = state
        .groups
        .remove_user(&actor, group_id, created.admin.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    state
        .groups
        .update_user_role(&actor, group_id, bob_view.user_id, GroupRole::Admin)
        .await
        .unwrap();
    state
        .groups
        .remove_user(&actor, group_id, created.admin.id)
        .await
        .unwrap();

    let err = state
        .groups
        .remove_user(&actor, group_id, bob_view.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    state.groups.delete_group(&actor, group_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_scope_grant_upsert() {
    let state = state().await;
    let actor = service_actor(&state).await;

    let created = state
        .groups
        .create_group(
            &actor,
            NewGroup {
                name: "Portail RH".to_string(),
                organization_siret: common::SIRET.to_string(),
                admin_email: unique_email("alice"),
                scope_grant: None,
                extra_members: Vec::new(),
                notify: false,
            },
        )
        .await
        .unwrap();

    let input = |scopes: &[&str]| ScopeGrantInput {
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        contract_description: "9001".to_string(),
        contract_url: "https://contracts.example/9001".to_string(),
    };

    let (grant, _) = state
        .groups
        .put_scopes(&actor, created.group.id, input(&["openid", "email", "openid"]))
        .await
        .unwrap();
    assert_eq!(grant.scopes, "openid email");

    let (grant, created_now) = state
        .groups
        .put_scopes(&actor, created.group.id, input(&["profile"]))
        .await
        .unwrap();
    assert!(!created_now);
    assert_eq!(grant.scopes, "profile");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_contract_resolves_to_one_group() {
    let state = state().await;
    let actor = service_actor(&state).await;
    let target = actor.service_provider_id();
    let contract_id = Uuid::new_v4().to_string();

    let envelope = |event: &str| -> WebhookEnvelope {
        serde_json::from_slice(&common::contract_event(event, "validated", &contract_id, event))
            .unwrap()
    };

    let first = state.contracts.handle(target, &envelope("approve")).await.unwrap();
    let second = state.contracts.handle(target, &envelope("update")).await.unwrap();

    match (first, second) {
        (
            ProvisionOutcome::Provisioned {
                group_id: a,
                group_created: true,
                ..
            },
            ProvisionOutcome::Provisioned {
                group_id: b,
                group_created: false,
                ..
            },
        ) => assert_eq!(a, b),
        other => panic!("unexpected outcomes: {:?}", other),
    }
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_subject_binds_once() {
    let state = state().await;
    let actor = service_actor(&state).await;
    let alice = unique_email("alice");
    state
        .groups
        .create_group(
            &actor,
            NewGroup {
                name: "Portail RH".to_string(),
                organization_siret: common::SIRET.to_string(),
                admin_email: alice.clone(),
                scope_grant: None,
                extra_members: Vec::new(),
                notify: false,
            },
        )
        .await
        .unwrap();

    let sub = Uuid::new_v4().to_string();
    state.pairing.pair(None, &alice, &sub).await.unwrap();
    let err = state
        .pairing
        .pair(None, &alice, &Uuid::new_v4().to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(state.pairing.get(&sub).await.unwrap(), Some(alice));
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_concurrent_first_deliveries_share_one_group() {
    let state = state().await;
    let actor = service_actor(&state).await;
    let target = actor.service_provider_id();

    for round in 0..10 {
        let contract_id = Uuid::new_v4().to_string();
        let siret = unique_siret();
        let email = unique_email("applicant");
        let envelope = |event_id: &str| -> WebhookEnvelope {
            serde_json::from_value(serde_json::json!({
                "event": "approve",
                "event_id": event_id,
                "fired_at": 1700000000,
                "model_type": "authorization_request",
                "data": {
                    "id": contract_id,
                    "state": "validated",
                    "intitule": "Portail RH",
                    "organization": { "siret": siret },
                    "applicant": { "email": email },
                    "scopes": ["openid"]
                }
            }))
            .unwrap()
        };

        let deliveries: Vec<_> = ["evt-a", "evt-b"]
            .into_iter()
            .map(|event_id| {
                let contracts = state.contracts.clone();
                let envelope = envelope(event_id);
                tokio::spawn(async move { contracts.handle(target, &envelope).await })
            })
            .collect();

        let mut group_ids = Vec::new();
        for delivery in deliveries {
            match delivery.await.unwrap() {
                Ok(ProvisionOutcome::Provisioned { group_id, .. }) => group_ids.push(group_id),
                other => panic!("round {}: delivery failed: {:?}", round, other),
            }
        }
        assert_eq!(group_ids[0], group_ids[1], "round {}", round);
    }
}
