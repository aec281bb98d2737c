use crate::application_port::AuthError;
use crate::domain_model::*;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session already exists")]
    Conflict,
    #[error("session not found")]
    NotFound,
    #[error("session revoked")]
    Revoked,
    #[error("session expired")]
    Expired,
    #[error("store error: {0}")]
    Unavailable(String),
}

impl From<SessionStoreError> for AuthError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::Unavailable(e) => {
                error!("session store failure: {}", e);
                AuthError::Unavailable(e)
            }
            other => {
                debug!("session rejected: {}", other);
                AuthError::Unauthorized
            }
        }
    }
}

/// Refresh-token bookkeeping.
///
/// `rotate` and `revoke` on the same jti must be linearizable: of two
/// concurrent rotations of one token exactly one succeeds and the other sees
/// `Revoked`.
#[async_trait::async_trait]
pub trait AuthSessionStore: Send + Sync {
    /// Inserts an active record. When the session names a device, other active
    /// lineages of the same user and device are revoked.
    async fn create(&self, session: NewSession) -> Result<(), SessionStoreError>;

    /// Atomically retires `old_jti` and records `new_jti` in the same lineage.
    async fn rotate(
        &self,
        old_jti: &Jti,
        user_id: UserId,
        new_jti: &Jti,
        new_expires_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError>;

    /// Idempotent: absent and already revoked records are not errors.
    async fn revoke(&self, jti: &Jti) -> Result<(), SessionStoreError>;

    /// Returns the number of records newly revoked.
    async fn revoke_lineage(&self, lineage: LineageId) -> Result<usize, SessionStoreError>;

    /// Returns the number of records newly revoked.
    async fn revoke_user(&self, user_id: UserId) -> Result<usize, SessionStoreError>;

    async fn is_active(&self, jti: &Jti) -> Result<bool, SessionStoreError>;

    async fn get(&self, jti: &Jti) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// Drops records that expired more than `grace` ago. Returns how many were
    /// removed.
    async fn sweep(&self, grace: chrono::Duration) -> Result<usize, SessionStoreError>;
}
