//! Authentication extractors.
//!
//! - `AuthUser` - end-user authentication via HS256 JWT bearer token
//! - `AdminAuth` - admin authentication for privileged endpoints

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use wrapgen_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user extracted from a JWT bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// The raw subject claim from the JWT.
    pub subject: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        // Allow test tokens in testing only.
        // This bypass is gated behind #[cfg(test)] or the "test-auth" feature
        // to ensure it is never active in production builds.
        #[cfg(any(test, feature = "test-auth"))]
        if let Some(user_id_str) = token.strip_prefix("test-token:") {
            let user_id = user_id_str
                .parse::<UserId>()
                .map_err(|_| ApiError::Unauthorized)?;

            return Ok(AuthUser {
                user_id,
                subject: user_id_str.to_string(),
            });
        }

        let claims = validate_jwt(token, state)?;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthUser {
            user_id,
            subject: claims.sub,
        })
    }
}

/// Admin authentication via API key.
///
/// Used for admin-only endpoints like credit top-ups. Requires the
/// `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if admin_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
}

/// Validate an HS256 JWT against the configured secret.
fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    if state.config.auth_secret.is_empty() {
        tracing::error!("AUTH_SECRET is not configured; rejecting all user tokens");
        return Err(ApiError::Unauthorized);
    }

    let key = DecodingKey::from_secret(state.config.auth_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<JwtClaims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn state_with_secret(secret: &str) -> AppState {
        let dir = tempfile::TempDir::new().unwrap();
        let store = wrapgen_store::RocksStore::open(dir.path()).unwrap();
        let config = crate::config::ServiceConfig {
            auth_secret: secret.into(),
            ..crate::config::ServiceConfig::default()
        };
        // Leak the TempDir so the store stays valid for the test.
        std::mem::forget(dir);
        AppState::new(Arc::new(store), config).unwrap()
    }

    #[test]
    fn valid_token_is_accepted() {
        let state = state_with_secret("s3cret");
        let user_id = UserId::generate();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();

        let parsed = validate_jwt(&token, &state).unwrap();
        assert_eq!(parsed.sub, user_id.to_string());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let state = state_with_secret("s3cret");
        let claims = JwtClaims {
            sub: UserId::generate().to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: 0,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"other"),
        )
        .unwrap();

        assert!(validate_jwt(&token, &state).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let state = state_with_secret("s3cret");
        let claims = JwtClaims {
            sub: UserId::generate().to_string(),
            exp: chrono::Utc::now().timestamp() - 3600,
            iat: 0,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();

        assert!(validate_jwt(&token, &state).is_err());
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let state = state_with_secret("");
        assert!(validate_jwt("any.token.here", &state).is_err());
    }
}
