use crate::application_port::AuthError;
use crate::domain_model::*;
use chrono::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("token malformed")]
    Malformed,
    #[error("token signature invalid")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Internal(String),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Internal(e) => {
                error!("token codec failure: {}", e);
                AuthError::Unavailable(e)
            }
            other => {
                debug!("token rejected: {}", other);
                AuthError::Unauthorized
            }
        }
    }
}

#[async_trait::async_trait]
pub trait TokenCodec: Send + Sync {
    /// Signs a new token with a random jti, issued now and expiring after `ttl`.
    async fn issue(
        &self,
        subject: &Identity,
        class: TokenClass,
        lineage: LineageId,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError>;

    /// Verifies signature first, then expiry, then returns the claims.
    async fn parse(&self, token: &str) -> Result<TokenClaims, TokenError>;
}
