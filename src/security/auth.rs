use crate::security::{AuthConfig, Result, SecurityError};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>, // Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>, // Legacy user ID claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: u64, // Expiration time
    pub iat: u64, // Issued at
    pub jti: String,
}

impl Claims {
    /// User id the rate limiter keys on: `sub`, else `id`
    pub fn principal_id(&self) -> Option<&str> {
        [self.sub.as_deref(), self.id.as_deref()]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Authentication manager
pub struct AuthManager {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Result<Self> {
        if config.enabled && config.jwt_secret.is_empty() {
            return Err(SecurityError::AuthenticationFailed {
                message: "JWT secret must not be empty".to_string(),
            });
        }

        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
        })
    }

    /// Create a new JWT token for a user
    pub fn create_token(
        &self,
        user_id: &str,
        role: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> Result<String> {
        if !self.config.enabled {
            return Err(SecurityError::AuthenticationFailed {
                message: "Authentication is disabled".to_string(),
            });
        }

        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: Some(user_id.to_string()),
            id: None,
            role: role.map(str::to_owned),
            exp: now + ttl_seconds.unwrap_or(self.config.jwt_expiry_seconds),
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::HS256);
        let token = encode(&header, &claims, &self.encoding_key).map_err(|e| {
            SecurityError::AuthenticationFailed {
                message: format!("Failed to create JWT token: {e}"),
            }
        })?;

        info!("JWT token created for user: {}", user_id);
        Ok(token)
    }

    /// Validate and decode JWT token
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        if !self.config.enabled {
            return Err(SecurityError::AuthenticationFailed {
                message: "Authentication is disabled".to_string(),
            });
        }

        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            SecurityError::AuthenticationFailed {
                message: format!("Invalid JWT token: {e}"),
            }
        })?;

        debug!(
            "JWT token validated for user: {}",
            token_data.claims.principal_id().unwrap_or("<anonymous>")
        );
        Ok(token_data.claims)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Attaches `Claims` for valid bearer tokens; requests without one continue
/// anonymously and are keyed by address.
pub async fn auth_middleware(
    State(auth_manager): State<Arc<AuthManager>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !auth_manager.is_enabled() {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned);

    if let Some(token) = token {
        match auth_manager.validate_token(&token) {
            Ok(claims) => {
                request.extensions_mut().insert(claims);
            }
            Err(e) => {
                debug!("JWT validation failed: {}", e);
            }
        }
    }

    next.run(request).await
}
