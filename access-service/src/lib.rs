pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AccessConfig;
use crate::services::{
    AccessStore, AdminService, BackgroundJobs, ContractEngine, CredentialVerifier, GroupEngine,
    IdentityProvider, JwtService, Notifier, OrganizationRegistry, PairingLedger, StateSigner,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::metrics::metrics,
        handlers::oauth::token,
        handlers::login::login,
        handlers::login::callback,
        handlers::groups::create_group,
        handlers::groups::list_groups,
        handlers::groups::get_group,
        handlers::groups::delete_group,
        handlers::members::add_member,
        handlers::members::remove_member,
        handlers::members::update_member_role,
        handlers::scopes::put_scopes,
        handlers::pairing::pair,
        handlers::pairing::get_pairing,
        handlers::webhook::receive_contract_event,
        handlers::audit::list_audit_events,
        handlers::admin::create_service_provider,
        handlers::admin::create_service_account,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::oauth::TokenRequest,
            dtos::oauth::OAuthErrorResponse,
            dtos::oauth::LoginResponse,
            dtos::groups::CreateGroupRequest,
            dtos::groups::GroupDetailResponse,
            dtos::groups::AddMemberRequest,
            dtos::groups::UpdateRoleRequest,
            dtos::groups::PutScopesRequest,
            dtos::groups::PairRequest,
            dtos::groups::PairingResponse,
            dtos::groups::WebhookResponse,
            dtos::admin::CreateServiceProviderRequest,
            dtos::admin::ServiceAccountCreatedResponse,
            services::TokenResponse,
            models::Group,
            models::GroupRole,
            models::MemberView,
            models::Organization,
            models::ScopeGrant,
            models::ServiceProvider,
            models::AuditEvent,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Groups", description = "Groups and their invariants"),
        (name = "Members", description = "Group membership and roles"),
        (name = "Scopes", description = "Per provider access grants"),
        (name = "Pairing", description = "Identity binding"),
        (name = "Webhooks", description = "Contract provisioning"),
        (name = "OAuth", description = "Service-account tokens"),
        (name = "Login", description = "End-user login"),
        (name = "Admin", description = "Operator endpoints"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "admin_api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-admin-api-key"))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub store: Arc<dyn AccessStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub jwt: JwtService,
    pub verifier: CredentialVerifier,
    pub groups: GroupEngine,
    pub contracts: ContractEngine,
    pub pairing: PairingLedger,
    pub admin_service: AdminService,
    pub state_signer: StateSigner,
    pub jobs: BackgroundJobs,
}

impl AppState {
    /// Wire the engines over the given ports.
    pub fn new(
        config: AccessConfig,
        store: Arc<dyn AccessStore>,
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<dyn OrganizationRegistry>,
        notifier: Arc<dyn Notifier>,
        jobs: BackgroundJobs,
    ) -> Result<Self, anyhow::Error> {
        let jwt = JwtService::new(&config.jwt)?;
        let verifier = CredentialVerifier::new(
            jwt.clone(),
            identity.clone(),
            store.clone(),
            &config.webhook.secret,
        );
        let groups = GroupEngine::new(store.clone(), notifier.clone(), registry, jobs.clone());
        let contracts = ContractEngine::new(
            groups.clone(),
            notifier,
            jobs.clone(),
            &config.contracts.base_url,
        );
        let state_signer = StateSigner::new(
            &config.identity.state_secret,
            config.identity.state_max_age_seconds,
        );

        Ok(Self {
            pairing: PairingLedger::new(store.clone()),
            admin_service: AdminService::new(store.clone()),
            config,
            store,
            identity,
            jwt,
            verifier,
            groups,
            contracts,
            state_signer,
            jobs,
        })
    }
}

/// Group, member and scope routes, shared by the service-account and
/// end-user families.
fn group_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/groups",
            post(handlers::groups::create_group).get(handlers::groups::list_groups),
        )
        .route(
            "/groups/:group_id",
            get(handlers::groups::get_group).delete(handlers::groups::delete_group),
        )
        .route(
            "/groups/:group_id/members",
            post(handlers::members::add_member),
        )
        .route(
            "/groups/:group_id/members/:user_id",
            axum::routing::delete(handlers::members::remove_member)
                .patch(handlers::members::update_member_role),
        )
        .route(
            "/groups/:group_id/scopes",
            axum::routing::put(handlers::scopes::put_scopes),
        )
}

fn cors_layer(config: &AccessConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-admin-api-key"),
            HeaderName::from_static("x-request-id"),
        ])
        .max_age(Duration::from_secs(600))
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let service_account_routes = group_routes()
        .route("/pairings", post(handlers::pairing::pair))
        .route("/pairings/:sub", get(handlers::pairing::get_pairing))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::service_account_auth_middleware,
        ));

    let end_user_routes = group_routes().route_layer(from_fn_with_state(
        state.clone(),
        middleware::end_user_auth_middleware,
    ));

    let webhook_routes = Router::new()
        .route(
            "/webhooks/:service_provider_id",
            post(handlers::webhook::receive_contract_event),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::webhook_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/service-providers",
            post(handlers::admin::create_service_provider),
        )
        .route(
            "/admin/service-providers/:service_provider_id/service-accounts",
            post(handlers::admin::create_service_account),
        )
        .route(
            "/admin/audit-events",
            get(handlers::audit::list_audit_events),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.swagger_enabled() {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let app = app
        .route("/oauth/token", post(handlers::oauth::token))
        .route("/auth/login", get(handlers::login::login))
        .route("/auth/callback", get(handlers::login::callback))
        .nest("/api/v1", service_account_routes)
        .nest("/resource/v1", end_user_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config));

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Database unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up"
        }
    })))
}
