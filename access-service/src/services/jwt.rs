use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Issues and validates service-account bearer tokens (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    token_expiry_seconds: i64,
}

/// Claims carried by a service-account token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountClaims {
    /// Subject (service account ID)
    pub sub: String,
    /// Owning service provider ID
    pub service_provider_id: Uuid,
    /// Service account ID
    pub service_account_id: Uuid,
    pub iss: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
}

/// OAuth2 token endpoint response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    #[schema(example = "bearer")]
    pub token_type: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        if config.secret.is_empty() {
            return Err(anyhow::anyhow!("JWT secret must not be empty"));
        }
        if config.token_expiry_seconds <= 0 {
            return Err(anyhow::anyhow!("JWT token expiry must be positive"));
        }

        tracing::info!("JWT service initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            token_expiry_seconds: config.token_expiry_seconds,
        })
    }

    /// Generate a token for a service account.
    pub fn issue_token(
        &self,
        service_provider_id: Uuid,
        service_account_id: Uuid,
    ) -> Result<TokenResponse, anyhow::Error> {
        self.issue_token_with_expiry(
            service_provider_id,
            service_account_id,
            Duration::seconds(self.token_expiry_seconds),
        )
    }

    fn issue_token_with_expiry(
        &self,
        service_provider_id: Uuid,
        service_account_id: Uuid,
        lifetime: Duration,
    ) -> Result<TokenResponse, anyhow::Error> {
        let now = Utc::now();
        let claims = ServiceAccountClaims {
            sub: service_account_id.to_string(),
            service_provider_id,
            service_account_id,
            iss: self.issuer.clone(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer".to_string(),
            expires_in: lifetime.num_seconds(),
        })
    }

    /// Validate signature, issuer and expiry.
    pub fn validate_token(&self, token: &str) -> Result<ServiceAccountClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<ServiceAccountClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: "test-secret".to_string(),
            issuer: "access-service".to_string(),
            token_expiry_seconds: 3600,
        })
        .unwrap()
    }

    #[test]
    fn test_token_round_trip() {
        let jwt = service();
        let sp = Uuid::new_v4();
        let sa = Uuid::new_v4();
        let response = jwt.issue_token(sp, sa).unwrap();
        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 3600);

        let claims = jwt.validate_token(&response.access_token).unwrap();
        assert_eq!(claims.service_provider_id, sp);
        assert_eq!(claims.service_account_id, sa);
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = service();
        let response = jwt
            .issue_token_with_expiry(Uuid::new_v4(), Uuid::new_v4(), Duration::seconds(-120))
            .unwrap();
        assert!(jwt.validate_token(&response.access_token).is_err());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let other = JwtService::new(&JwtConfig {
            secret: "another-secret".to_string(),
            issuer: "access-service".to_string(),
            token_expiry_seconds: 3600,
        })
        .unwrap();
        let response = other.issue_token(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert!(service().validate_token(&response.access_token).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = JwtService::new(&JwtConfig {
            secret: String::new(),
            issuer: "access-service".to_string(),
            token_expiry_seconds: 3600,
        });
        assert!(result.is_err());
    }
}
