use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// The only errors that cross the session manager boundary.
///
/// Every authentication failure collapses into `Unauthorized` so callers can
/// not tell which check failed. `Unavailable` marks operational failures that
/// are worth retrying.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    /// Optional client label; a new login on the same device ends the previous
    /// session of that device.
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub identity: Identity,
    pub tokens: AuthTokens,
}

/// Result of a refresh: a new access token and the rotated refresh token that
/// replaces the one presented.
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub identity: Identity,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReusePolicy {
    /// Revoke every token descending from the replayed token's login.
    Lineage,
    /// Revoke every session of the user.
    User,
}

#[async_trait::async_trait]
pub trait SessionManager: Send + Sync {
    async fn login(&self, input: LoginInput) -> Result<LoginResult, AuthError>;
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshResult, AuthError>;
    async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), AuthError>;
    /// Validates an access token without touching the session store.
    async fn authenticate(&self, access_token: &str) -> Result<Identity, AuthError>;
    /// Ends every session of a user. Returns how many records were revoked.
    async fn revoke_all_sessions(&self, user_id: UserId) -> Result<usize, AuthError>;
}
