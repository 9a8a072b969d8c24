//! External OIDC identity provider: token introspection (RFC 7662) and the
//! authorization-code login used to pair identities.

use crate::config::IdentityConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedRequestExt;
use std::collections::HashMap;
use std::time::Duration;

/// RFC 7662 introspection response (fields this service reads).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<Introspection, anyhow::Error>;

    /// URL the browser is redirected to for login.
    fn authorize_url(&self, state: &str) -> Result<String, anyhow::Error>;

    /// Exchange an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, anyhow::Error>;

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, anyhow::Error>;
}

#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    config: IdentityConfig,
}

#[derive(Deserialize)]
struct CodeExchangeResponse {
    access_token: String,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build identity provider client: {}", e))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[tracing::instrument(skip_all)]
    async fn introspect(&self, token: &str) -> Result<Introspection, anyhow::Error> {
        let response = self
            .client
            .post(&self.config.introspection_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .with_trace_context()
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Introspection request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Introspection endpoint returned {}",
                response.status()
            ));
        }

        response
            .json::<Introspection>()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid introspection response: {}", e))
    }

    fn authorize_url(&self, state: &str) -> Result<String, anyhow::Error> {
        let query = serde_urlencoded::to_string([
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", "openid email"),
            ("state", state),
        ])?;
        Ok(format!("{}?{}", self.config.authorize_url, query))
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<String, anyhow::Error> {
        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .with_trace_context()
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Code exchange failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Token endpoint returned {}",
                response.status()
            ));
        }

        let body: CodeExchangeResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid token response: {}", e))?;
        Ok(body.access_token)
    }

    #[tracing::instrument(skip_all)]
    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, anyhow::Error> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .with_trace_context()
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Userinfo request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Userinfo endpoint returned {}",
                response.status()
            ));
        }

        response
            .json::<UserInfo>()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid userinfo response: {}", e))
    }
}

/// Fixed token and code tables, for tests and local development.
#[derive(Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Introspection>,
    codes: HashMap<String, UserInfo>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, introspection: Introspection) -> Self {
        self.tokens.insert(token.to_string(), introspection);
        self
    }

    /// Register an active token for `sub` issued to `client_id`.
    pub fn with_active_token(self, token: &str, sub: &str, client_id: &str) -> Self {
        self.with_token(
            token,
            Introspection {
                active: true,
                sub: Some(sub.to_string()),
                client_id: Some(client_id.to_string()),
                email: None,
                exp: None,
            },
        )
    }

    pub fn with_code(mut self, code: &str, user: UserInfo) -> Self {
        self.codes.insert(code.to_string(), user);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn introspect(&self, token: &str) -> Result<Introspection, anyhow::Error> {
        Ok(self.tokens.get(token).cloned().unwrap_or_default())
    }

    fn authorize_url(&self, state: &str) -> Result<String, anyhow::Error> {
        let query = serde_urlencoded::to_string([("state", state)])?;
        Ok(format!("https://idp.test/authorize?{}", query))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, anyhow::Error> {
        if self.codes.contains_key(code) {
            Ok(format!("access-{}", code))
        } else {
            Err(anyhow::anyhow!("Unknown authorization code"))
        }
    }

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, anyhow::Error> {
        access_token
            .strip_prefix("access-")
            .and_then(|code| self.codes.get(code))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown access token"))
    }
}
