use crate::auth::{AuthError, AuthResult};
use crate::config::{env_optional, env_string, env_u64};

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub jwt_secret: String,
    pub jwt_kid: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let jwt_secret = env_optional("KARMA_JWT_SECRET")
            .ok_or_else(|| AuthError::Config("KARMA_JWT_SECRET is required".into()))?;
        let ttl = env_u64("KARMA_ACCESS_TOKEN_TTL_SECS", 60 * 60);

        Ok(Self {
            issuer: env_string("KARMA_JWT_ISSUER", "http://localhost"),
            audience: env_string("KARMA_JWT_AUDIENCE", "karma-api"),
            access_token_ttl_secs: i64::try_from(ttl).unwrap_or(i64::MAX),
            jwt_secret,
            jwt_kid: env_optional("KARMA_JWT_KID"),
        })
    }
}
