//! Organization registry lookups (legal name by SIRET).

use crate::config::RegistryConfig;
use crate::models::Siret;
use async_trait::async_trait;
use serde::Deserialize;
use service_core::observability::TracedRequestExt;
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait OrganizationRegistry: Send + Sync {
    /// Legal name of the establishment, or `None` when the registry has no
    /// record of it.
    async fn lookup_name(&self, siret: &Siret) -> Result<Option<String>, anyhow::Error>;
}

#[derive(Clone)]
pub struct HttpOrganizationRegistry {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    nom_complet: Option<String>,
}

impl HttpOrganizationRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build registry client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OrganizationRegistry for HttpOrganizationRegistry {
    #[tracing::instrument(skip(self), fields(siret = %siret))]
    async fn lookup_name(&self, siret: &Siret) -> Result<Option<String>, anyhow::Error> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", siret.as_str())])
            .with_trace_context()
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Registry request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Registry returned {} for {}",
                response.status(),
                siret
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid registry response: {}", e))?;

        Ok(body
            .results
            .into_iter()
            .find_map(|r| r.nom_complet)
            .filter(|name| !name.trim().is_empty()))
    }
}

/// Fixed name table, for tests and local development.
#[derive(Clone, Default)]
pub struct StaticOrganizationRegistry {
    names: HashMap<String, String>,
}

impl StaticOrganizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, siret: &str, name: &str) -> Self {
        self.names.insert(siret.to_string(), name.to_string());
        self
    }
}

#[async_trait]
impl OrganizationRegistry for StaticOrganizationRegistry {
    async fn lookup_name(&self, siret: &Siret) -> Result<Option<String>, anyhow::Error> {
        Ok(self.names.get(siret.as_str()).cloned())
    }
}
