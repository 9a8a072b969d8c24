//! Shared setup for access-service integration tests: an application over
//! the in-memory store with static identity-provider and registry fakes.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, ContractsConfig, DatabaseConfig, Environment, IdentityConfig, JobsConfig,
        JwtConfig, RegistryConfig, SecurityConfig, SmtpConfig, SwaggerConfig, SwaggerMode,
        WebhookConfig,
    },
    models::ServiceProvider,
    services::{
        AccessStore, BackgroundJobs, InMemoryStore, Introspection, RecordingNotifier,
        StaticIdentityProvider, StaticOrganizationRegistry, UserInfo,
    },
    AppState,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use service_core::config::Config as CommonConfig;
use service_core::utils::signature::generate_signature;
use std::sync::{Arc, Once};
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-key-12345";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const PORTAL_CLIENT_ID: &str = "portal-client";
pub const SIRET: &str = "21920023500014";

/// End-user bearer tokens known to the static identity provider.
pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";
pub const INACTIVE_TOKEN: &str = "inactive-token";
pub const UNMAPPED_CLIENT_TOKEN: &str = "unmapped-client-token";
pub const NO_CLIENT_TOKEN: &str = "no-client-token";

pub const ALICE_SUB: &str = "sub-alice";
pub const BOB_SUB: &str = "sub-bob";
pub const ALICE_CODE: &str = "code-alice";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn,access_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config() -> AccessConfig {
    AccessConfig {
        common: CommonConfig::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout_seconds: 5,
        },
        jwt: JwtConfig {
            secret: "test-jwt-secret-with-enough-entropy".to_string(),
            issuer: "access-service-test".to_string(),
            token_expiry_seconds: 300,
        },
        identity: IdentityConfig {
            introspection_url: "https://idp.test/introspect".to_string(),
            authorize_url: "https://idp.test/authorize".to_string(),
            token_url: "https://idp.test/token".to_string(),
            userinfo_url: "https://idp.test/userinfo".to_string(),
            client_id: "access".to_string(),
            client_secret: "idp-secret".to_string(),
            redirect_uri: "http://localhost:8080/auth/callback".to_string(),
            state_secret: "test-state-secret".to_string(),
            state_max_age_seconds: 600,
            timeout_seconds: 5,
        },
        webhook: WebhookConfig {
            secret: WEBHOOK_SECRET.to_string(),
        },
        contracts: ContractsConfig {
            base_url: "https://contracts.example".to_string(),
        },
        registry: RegistryConfig {
            base_url: "https://registry.test".to_string(),
            timeout_seconds: 5,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: String::new(),
            password: String::new(),
            from: "no-reply@access.test".to_string(),
        },
        jobs: JobsConfig {
            max_retries: 3,
            retry_delay_seconds: 0,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_api_key: TEST_ADMIN_API_KEY.to_string(),
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
    }
}

fn identity_provider() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_active_token(ALICE_TOKEN, ALICE_SUB, PORTAL_CLIENT_ID)
        .with_active_token(BOB_TOKEN, BOB_SUB, PORTAL_CLIENT_ID)
        .with_active_token(UNMAPPED_CLIENT_TOKEN, "sub-x", "unknown-client")
        .with_token(
            INACTIVE_TOKEN,
            Introspection {
                active: false,
                sub: Some(ALICE_SUB.to_string()),
                client_id: Some(PORTAL_CLIENT_ID.to_string()),
                ..Default::default()
            },
        )
        .with_token(
            NO_CLIENT_TOKEN,
            Introspection {
                active: true,
                sub: Some(ALICE_SUB.to_string()),
                ..Default::default()
            },
        )
        .with_code(
            ALICE_CODE,
            UserInfo {
                sub: ALICE_SUB.to_string(),
                email: "Alice@Example.fr".to_string(),
            },
        )
}

/// Application state over `store` with the static identity provider and
/// registry fakes.
pub fn build_state(
    store: Arc<dyn AccessStore>,
    notifier: Arc<RecordingNotifier>,
    jobs: BackgroundJobs,
) -> AppState {
    let registry = StaticOrganizationRegistry::new().with_name(SIRET, "Commune de Clamart");
    AppState::new(
        test_config(),
        store,
        Arc::new(identity_provider()),
        Arc::new(registry),
        notifier,
        jobs,
    )
    .expect("Failed to build application state")
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: InMemoryStore,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: BackgroundJobs,
    /// Provider registered with [`PORTAL_CLIENT_ID`].
    pub provider: ServiceProvider,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_store(InMemoryStore::new()).await
    }

    pub async fn spawn_with_store(store: InMemoryStore) -> Self {
        init_tracing();

        let notifier = Arc::new(RecordingNotifier::new());
        let jobs = BackgroundJobs::with_policy(Duration::ZERO, 3);
        let state = build_state(Arc::new(store.clone()), notifier.clone(), jobs.clone());

        let provider = state
            .admin_service
            .create_service_provider("Portail RH", Some(PORTAL_CLIENT_ID.to_string()))
            .await
            .expect("Failed to register provider");

        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            store,
            notifier,
            jobs,
            provider,
        }
    }

    /// Bearer token of a fresh service account of `provider_id`.
    pub async fn service_token_for(&self, provider_id: Uuid) -> String {
        let issued = self
            .state
            .admin_service
            .create_service_account(provider_id)
            .await
            .expect("Failed to create service account");
        self.state
            .jwt
            .issue_token(provider_id, issued.account.id)
            .expect("Failed to issue token")
            .access_token
    }

    pub async fn service_token(&self) -> String {
        self.service_token_for(self.provider.id).await
    }

    /// Register another provider and return a token for it.
    pub async fn other_provider_token(&self) -> String {
        let other = self
            .state
            .admin_service
            .create_service_provider("Autre", None)
            .await
            .expect("Failed to register provider");
        self.service_token_for(other.id).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    /// Create a group through the service-account API and return its id.
    pub async fn create_group(&self, token: &str, admin_email: &str) -> Uuid {
        let (status, body) = self
            .send(json_request(
                Method::POST,
                "/api/v1/groups",
                Some(token),
                serde_json::json!({
                    "name": "Portail RH",
                    "organization_siret": SIRET,
                    "admin_email": admin_email,
                    "scopes": ["openid"],
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create group failed: {}", body);
        body["id"].as_str().unwrap().parse().unwrap()
    }

    /// Id of the account registered for `email`.
    pub async fn user_id(&self, email: &str) -> Uuid {
        self.store
            .users()
            .await
            .into_iter()
            .find(|u| u.email == email)
            .map(|u| u.id)
            .expect("No such user")
    }

    /// Bind `sub` to the account of `email` directly through the ledger.
    pub async fn pair(&self, email: &str, sub: &str) {
        self.state
            .pairing
            .pair(None, email, sub)
            .await
            .expect("Pairing failed");
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn empty_request(method: Method, uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

/// `sha256=<hex>` signature header value for a webhook body.
pub fn sign(body: &[u8]) -> String {
    format!(
        "sha256={}",
        generate_signature(WEBHOOK_SECRET.as_bytes(), body).expect("Failed to sign")
    )
}

pub fn webhook_request(provider_id: Uuid, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("/webhooks/{}", provider_id))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    builder.body(Body::from(body)).expect("Failed to build request")
}

pub fn contract_event(event: &str, state: &str, contract_id: &str, event_id: &str) -> Vec<u8> {
    serde_json::json!({
        "event": event,
        "event_id": event_id,
        "fired_at": 1700000000,
        "model_type": "authorization_request",
        "data": {
            "id": contract_id,
            "state": state,
            "intitule": "Portail RH",
            "organization": { "siret": SIRET },
            "applicant": { "email": "alice@example.fr" },
            "scopes": ["openid", "profile"]
        }
    })
    .to_string()
    .into_bytes()
}
