//! Turns an inbound request into exactly one [`Actor`].

use crate::models::Actor;
use crate::services::identity_provider::IdentityProvider;
use crate::services::store::AccessStore;
use crate::services::{JwtService, ServiceError};
use service_core::axum::http::{header::AUTHORIZATION, HeaderMap};
use service_core::utils::signature::{strip_sha256_prefix, verify_signature};
use std::sync::Arc;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Clone)]
pub struct CredentialVerifier {
    jwt: JwtService,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn AccessStore>,
    webhook_secret: Vec<u8>,
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ServiceError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthenticated("Missing bearer token".to_string()))
}

impl CredentialVerifier {
    pub fn new(
        jwt: JwtService,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn AccessStore>,
        webhook_secret: &str,
    ) -> Self {
        Self {
            jwt,
            identity,
            store,
            webhook_secret: webhook_secret.as_bytes().to_vec(),
        }
    }

    /// Service-account bearer JWT.
    pub fn service_account(&self, headers: &HeaderMap) -> Result<Actor, ServiceError> {
        let token = bearer_token(headers)?;
        let claims = self.jwt.validate_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected service-account token");
            ServiceError::Unauthenticated("Invalid or expired access token".to_string())
        })?;

        Ok(Actor::ServiceAccount {
            service_provider_id: claims.service_provider_id,
            service_account_id: claims.service_account_id,
        })
    }

    /// End-user token introspected against the identity provider.
    #[tracing::instrument(skip_all)]
    pub async fn end_user(&self, headers: &HeaderMap) -> Result<Actor, ServiceError> {
        let token = bearer_token(headers)?;

        let introspection = self.identity.introspect(token).await.map_err(|e| {
            tracing::warn!(error = %e, "Token introspection failed");
            ServiceError::Unauthenticated("Token introspection failed".to_string())
        })?;

        if !introspection.active {
            return Err(ServiceError::Unauthenticated(
                "Token is not active".to_string(),
            ));
        }

        let (sub, client_id) = match (introspection.sub, introspection.client_id) {
            (Some(sub), Some(client_id)) if !sub.is_empty() && !client_id.is_empty() => {
                (sub, client_id)
            }
            _ => {
                return Err(ServiceError::Unauthenticated(
                    "Token is missing required claims".to_string(),
                ))
            }
        };

        let mut tx = self.store.begin().await?;
        let provider = tx
            .find_service_provider_by_client_id(&client_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id = %client_id, "Token issued to an unregistered client");
                ServiceError::Unauthenticated("Unknown client".to_string())
            })?;

        Ok(Actor::EndUser {
            acting_subject: sub,
            email: introspection.email,
            service_provider_id: provider.id,
        })
    }

    /// HMAC-SHA256 over the raw body. Runs before the body is parsed.
    pub fn webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Actor, ServiceError> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(strip_sha256_prefix)
            .ok_or_else(|| {
                ServiceError::Unauthenticated("Missing or malformed signature header".to_string())
            })?;

        let valid = verify_signature(&self.webhook_secret, body, signature)?;
        if !valid {
            return Err(ServiceError::Unauthenticated(
                "Invalid webhook signature".to_string(),
            ));
        }

        Ok(Actor::Webhook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::ServiceProvider;
    use crate::services::identity_provider::{Introspection, StaticIdentityProvider};
    use crate::services::InMemoryStore;
    use service_core::axum::http::HeaderValue;
    use service_core::utils::signature::generate_signature;
    use uuid::Uuid;

    fn jwt() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: "jwt-secret".to_string(),
            issuer: "access-service".to_string(),
            token_expiry_seconds: 60,
        })
        .unwrap()
    }

    async fn verifier(identity: StaticIdentityProvider) -> (CredentialVerifier, Uuid) {
        let store = InMemoryStore::new();
        let provider = ServiceProvider::new("Portail".to_string(), Some("portail".to_string()));
        let mut tx = store.begin().await.unwrap();
        tx.insert_service_provider(&provider).await.unwrap();
        tx.commit().await.unwrap();

        (
            CredentialVerifier::new(jwt(), Arc::new(identity), Arc::new(store), "hook-secret"),
            provider.id,
        )
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_service_account_token() {
        let (verifier, _) = verifier(StaticIdentityProvider::new()).await;
        let sp = Uuid::new_v4();
        let sa = Uuid::new_v4();
        let token = jwt().issue_token(sp, sa).unwrap().access_token;

        let actor = verifier.service_account(&bearer(&token)).unwrap();
        assert_eq!(
            actor,
            Actor::ServiceAccount {
                service_provider_id: sp,
                service_account_id: sa
            }
        );

        assert!(matches!(
            verifier.service_account(&bearer("garbage")),
            Err(ServiceError::Unauthenticated(_))
        ));
        assert!(matches!(
            verifier.service_account(&HeaderMap::new()),
            Err(ServiceError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_end_user_token() {
        let identity = StaticIdentityProvider::new()
            .with_active_token("good", "sub-1", "portail")
            .with_active_token("foreign", "sub-1", "unknown-client")
            .with_token(
                "no-sub",
                Introspection {
                    active: true,
                    client_id: Some("portail".to_string()),
                    ..Default::default()
                },
            );
        let (verifier, provider_id) = verifier(identity).await;

        let actor = verifier.end_user(&bearer("good")).await.unwrap();
        assert_eq!(
            actor,
            Actor::EndUser {
                acting_subject: "sub-1".to_string(),
                email: None,
                service_provider_id: provider_id
            }
        );

        for token in ["foreign", "no-sub", "inactive"] {
            assert!(matches!(
                verifier.end_user(&bearer(token)).await,
                Err(ServiceError::Unauthenticated(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_webhook_signature() {
        let (verifier, _) = verifier(StaticIdentityProvider::new()).await;
        let body = br#"{"event":"approve"}"#;
        let signature = generate_signature(b"hook-secret", body).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&format!("sha256={}", signature)).unwrap(),
        );
        assert_eq!(verifier.webhook(&headers, body).unwrap(), Actor::Webhook);
        assert!(verifier.webhook(&headers, b"{}").is_err());

        let mut unprefixed = HeaderMap::new();
        unprefixed.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
        assert!(verifier.webhook(&unprefixed, body).is_err());
        assert!(verifier.webhook(&HeaderMap::new(), body).is_err());
    }
}
