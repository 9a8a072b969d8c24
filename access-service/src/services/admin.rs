//! Registration of service providers and their machine credentials.

use crate::models::{ServiceAccount, ServiceProvider};
use crate::services::store::{constraints, AccessStore};
use crate::services::ServiceError;
use crate::utils::{hash_secret, random_token, verify_secret, ClientSecret};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Credentials of a new service account. The secret is only ever returned
/// here.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub account: ServiceAccount,
    pub client_secret: ClientSecret,
}

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn AccessStore>,
}

impl AdminService {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn create_service_provider(
        &self,
        name: &str,
        oidc_client_id: Option<String>,
    ) -> Result<ServiceProvider, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("name is required".to_string()));
        }
        let oidc_client_id = oidc_client_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let provider = ServiceProvider::new(name.to_string(), oidc_client_id);
        let mut tx = self.store.begin().await?;
        tx.insert_service_provider(&provider).await.map_err(|e| {
            if e.is_unique_violation_on(constraints::SERVICE_PROVIDER_CLIENT_ID) {
                ServiceError::Conflict("OIDC client id is already registered".to_string())
            } else {
                e
            }
        })?;
        tx.commit().await?;

        tracing::info!(service_provider_id = %provider.id, "Service provider registered");
        Ok(provider)
    }

    #[instrument(skip(self), fields(service_provider_id = %service_provider_id))]
    pub async fn create_service_account(
        &self,
        service_provider_id: Uuid,
    ) -> Result<IssuedCredentials, ServiceError> {
        let client_secret = ClientSecret::generate();
        let secret_hash = hash_secret(&client_secret).await?;

        let mut tx = self.store.begin().await?;
        let provider = tx
            .find_service_provider(service_provider_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Service provider {} not found", service_provider_id))
            })?;
        if provider.is_webhook_identity() {
            return Err(ServiceError::Validation(
                "The webhook identity cannot own service accounts".to_string(),
            ));
        }

        let account = ServiceAccount::new(
            service_provider_id,
            format!("sa_{}", random_token(16)),
            secret_hash,
        );
        tx.insert_service_account(&account).await?;
        tx.commit().await?;

        tracing::info!(client_id = %account.client_id, "Service account created");
        Ok(IssuedCredentials {
            account,
            client_secret,
        })
    }

    /// Client-credentials check for the token endpoint. Unknown clients,
    /// inactive accounts and wrong secrets are indistinguishable to callers.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &ClientSecret,
    ) -> Result<ServiceAccount, ServiceError> {
        let rejected = || ServiceError::Unauthenticated("Invalid client credentials".to_string());

        let mut tx = self.store.begin().await?;
        let Some(account) = tx.find_service_account_by_client_id(client_id).await? else {
            tracing::warn!(client_id = %client_id, "Token request for unknown client");
            return Err(rejected());
        };
        drop(tx);

        if !account.active {
            tracing::warn!(client_id = %client_id, "Token request for inactive client");
            return Err(rejected());
        }

        if !verify_secret(client_secret, &account.secret_hash).await? {
            tracing::warn!(client_id = %client_id, "Token request with wrong secret");
            return Err(rejected());
        }

        Ok(account)
    }
}
