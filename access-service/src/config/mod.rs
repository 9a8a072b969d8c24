use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub identity: IdentityConfig,
    pub webhook: WebhookConfig,
    pub contracts: ContractsConfig,
    pub registry: RegistryConfig,
    pub smtp: SmtpConfig,
    pub jobs: JobsConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

/// Service-account bearer tokens (HS256).
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub token_expiry_seconds: i64,
}

/// External OIDC identity provider used for end users.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub introspection_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub state_secret: String,
    pub state_max_age_seconds: i64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    /// Used to build a contract URL when the payload carries none.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub admin_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Authenticated,
    Disabled,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
                acquire_timeout_seconds: parse_env(
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                    Some("30"),
                    is_prod,
                )?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", Some("dev-only-jwt-secret"), is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("access-service"), is_prod)?,
                token_expiry_seconds: parse_env("JWT_TOKEN_EXPIRY_SECONDS", Some("3600"), is_prod)?,
            },
            identity: IdentityConfig {
                introspection_url: get_env(
                    "OIDC_INTROSPECTION_URL",
                    Some("http://localhost:9000/oauth/introspect"),
                    is_prod,
                )?,
                authorize_url: get_env(
                    "OIDC_AUTHORIZE_URL",
                    Some("http://localhost:9000/oauth/authorize"),
                    is_prod,
                )?,
                token_url: get_env(
                    "OIDC_TOKEN_URL",
                    Some("http://localhost:9000/oauth/token"),
                    is_prod,
                )?,
                userinfo_url: get_env(
                    "OIDC_USERINFO_URL",
                    Some("http://localhost:9000/oauth/userinfo"),
                    is_prod,
                )?,
                client_id: get_env("OIDC_CLIENT_ID", Some("access-service"), is_prod)?,
                client_secret: get_env("OIDC_CLIENT_SECRET", Some("dev-only-client-secret"), is_prod)?,
                redirect_uri: get_env(
                    "OIDC_REDIRECT_URI",
                    Some("http://localhost:8080/auth/callback"),
                    is_prod,
                )?,
                state_secret: get_env("OAUTH_STATE_SECRET", Some("dev-only-state-secret"), is_prod)?,
                state_max_age_seconds: parse_env("OAUTH_STATE_MAX_AGE_SECONDS", Some("600"), is_prod)?,
                timeout_seconds: parse_env("OIDC_TIMEOUT_SECONDS", Some("10"), is_prod)?,
            },
            webhook: WebhookConfig {
                secret: get_env("WEBHOOK_SECRET", Some("dev-only-webhook-secret"), is_prod)?,
            },
            contracts: ContractsConfig {
                base_url: get_env(
                    "CONTRACTS_BASE_URL",
                    Some("http://localhost:3000/authorization-requests"),
                    is_prod,
                )?,
            },
            registry: RegistryConfig {
                base_url: get_env(
                    "REGISTRY_BASE_URL",
                    Some("https://recherche-entreprises.api.gouv.fr"),
                    is_prod,
                )?,
                timeout_seconds: parse_env("REGISTRY_TIMEOUT_SECONDS", Some("10"), is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", Some("587"), is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            jobs: JobsConfig {
                max_retries: parse_env("JOBS_MAX_RETRIES", Some("3"), is_prod)?,
                retry_delay_seconds: parse_env("JOBS_RETRY_DELAY_SECONDS", Some("30"), is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                admin_api_key: get_env("ADMIN_API_KEY", None, true)?,
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.token_expiry_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_TOKEN_EXPIRY_SECONDS must be positive"
            )));
        }

        if self.identity.state_max_age_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_STATE_MAX_AGE_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            let secrets = [
                ("JWT_SECRET", &self.jwt.secret),
                ("WEBHOOK_SECRET", &self.webhook.secret),
                ("OAUTH_STATE_SECRET", &self.identity.state_secret),
                ("OIDC_CLIENT_SECRET", &self.identity.client_secret),
                ("ADMIN_API_KEY", &self.security.admin_api_key),
            ];
            if let Some((name, _)) = secrets.iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must not be empty in production",
                    name
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::error!("Swagger is publicly accessible in production - consider using 'authenticated' or 'disabled'");
            }
        }

        Ok(())
    }

    pub fn swagger_enabled(&self) -> bool {
        match self.environment {
            Environment::Dev => true,
            Environment::Prod => self.swagger.enabled != SwaggerMode::Disabled,
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "authenticated" => Ok(SwaggerMode::Authenticated),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_swagger_mode_parse() {
        assert_eq!(
            "disabled".parse::<SwaggerMode>().unwrap(),
            SwaggerMode::Disabled
        );
        assert!("open".parse::<SwaggerMode>().is_err());
    }

    #[test]
    fn test_get_env_defaults_only_outside_prod() {
        let key = "ACCESS_SERVICE_TEST_UNSET_VARIABLE";
        assert_eq!(get_env(key, Some("fallback"), false).unwrap(), "fallback");
        assert!(get_env(key, Some("fallback"), true).is_err());
        assert!(get_env(key, None, false).is_err());
    }

    #[test]
    fn test_parse_env_reports_key() {
        let err = parse_env::<u32>("ACCESS_SERVICE_TEST_UNSET_NUMBER", Some("abc"), false)
            .unwrap_err();
        assert!(err.to_string().contains("ACCESS_SERVICE_TEST_UNSET_NUMBER"));
    }
}
