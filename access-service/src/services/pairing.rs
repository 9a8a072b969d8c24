//! Binds an external identity-provider subject to an internal account, once.

use crate::models::{normalize_email, Actor, AuditAction, NewAuditEvent};
use crate::services::store::{constraints, AccessStore};
use crate::services::ServiceError;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    /// This call bound the subject.
    Paired,
    /// The account was already bound to the same subject.
    AlreadyPaired,
}

#[derive(Clone)]
pub struct PairingLedger {
    store: Arc<dyn AccessStore>,
}

impl PairingLedger {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    /// Bind `subject` to the account registered for `email`.
    ///
    /// `actor` is `None` when the person pairs themselves through the login
    /// flow.
    #[instrument(skip(self, actor, email, subject))]
    pub async fn pair(
        &self,
        actor: Option<&Actor>,
        email: &str,
        subject: &str,
    ) -> Result<PairingOutcome, ServiceError> {
        let email = normalize_email(email);
        if email.is_empty() || subject.trim().is_empty() {
            return Err(ServiceError::Validation(
                "email and subject are required".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        let user = tx
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No account for {}", email)))?;

        let bound = tx
            .bind_subject_if_unset(user.id, subject)
            .await
            .map_err(|e| {
                if e.is_unique_violation_on(constraints::USER_SUBJECT) {
                    ServiceError::Conflict("Subject is already bound to another account".to_string())
                } else {
                    e
                }
            })?;

        if !bound {
            // Lost the conditional update: the stored subject decides.
            let current = tx
                .find_user_by_id(user.id)
                .await?
                .and_then(|u| u.sub)
                .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Account vanished")))?;

            return if current == subject {
                Ok(PairingOutcome::AlreadyPaired)
            } else {
                tracing::warn!(user_id = %user.id, "Pairing rejected: subject mismatch");
                Err(ServiceError::Conflict(
                    "Account is already bound to a different subject".to_string(),
                ))
            };
        }

        let event = match actor {
            Some(actor) => NewAuditEvent::new(actor, AuditAction::UserPaired, user.id),
            None => NewAuditEvent::by_subject(subject, AuditAction::UserPaired, user.id),
        }
        .user(user.id)
        .snapshot(&json!({ "email": email, "sub": subject, "verified": true }));
        tx.insert_audit_event(&event.into_event()).await?;

        tx.commit().await?;

        tracing::info!(user_id = %user.id, "Identity paired");
        Ok(PairingOutcome::Paired)
    }

    /// Email bound to `subject`, if any.
    pub async fn get(&self, subject: &str) -> Result<Option<String>, ServiceError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.find_user_by_subject(subject).await?.map(|u| u.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::InMemoryStore;

    async fn ledger_with(emails: &[&str]) -> (PairingLedger, InMemoryStore) {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for email in emails {
            tx.insert_user(&User::new(email)).await.unwrap();
        }
        tx.commit().await.unwrap();
        (PairingLedger::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_first_pair_binds_and_verifies() {
        let (ledger, store) = ledger_with(&["a@x.fr"]).await;

        let outcome = ledger.pair(None, "A@x.fr", "S1").await.unwrap();
        assert_eq!(outcome, PairingOutcome::Paired);

        let users = store.users().await;
        assert_eq!(users[0].sub.as_deref(), Some("S1"));
        assert!(users[0].verified);
        assert_eq!(ledger.get("S1").await.unwrap().as_deref(), Some("a@x.fr"));

        let audit = store.audit_events().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "user_paired");
    }

    #[tokio::test]
    async fn test_same_subject_is_a_noop() {
        let (ledger, store) = ledger_with(&["a@x.fr"]).await;
        ledger.pair(None, "a@x.fr", "S1").await.unwrap();

        let outcome = ledger.pair(None, "a@x.fr", "S1").await.unwrap();
        assert_eq!(outcome, PairingOutcome::AlreadyPaired);
        assert_eq!(store.audit_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_different_subject_conflicts() {
        let (ledger, store) = ledger_with(&["a@x.fr"]).await;
        ledger.pair(None, "a@x.fr", "S1").await.unwrap();

        let err = ledger.pair(None, "a@x.fr", "S2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(store.users().await[0].sub.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_subject_bound_elsewhere_conflicts() {
        let (ledger, _) = ledger_with(&["a@x.fr", "b@x.fr"]).await;
        ledger.pair(None, "a@x.fr", "S1").await.unwrap();

        let err = ledger.pair(None, "b@x.fr", "S1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_email() {
        let (ledger, _) = ledger_with(&[]).await;
        let err = ledger.pair(None, "nobody@x.fr", "S1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(ledger.get("S1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_pairs_have_one_winner() {
        let (ledger, store) = ledger_with(&["a@x.fr"]).await;

        let (first, second) = tokio::join!(
            ledger.pair(None, "a@x.fr", "S1"),
            ledger.pair(None, "a@x.fr", "S2")
        );
        let winners = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Ok(PairingOutcome::Paired)))
            .count();
        assert_eq!(winners, 1);
        assert!(first.is_err() || second.is_err());

        let bound = store.users().await[0].sub.clone().unwrap();
        assert!(bound == "S1" || bound == "S2");
    }
}
