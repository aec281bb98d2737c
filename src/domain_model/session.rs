use crate::domain_model::{Jti, LineageId, UserId};
use chrono::{DateTime, Utc};

/// Input to `AuthSessionStore::create`.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub jti: Jti,
    pub lineage: LineageId,
    pub device: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Bookkeeping for one refresh token.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionRecord {
    pub jti: Jti,
    pub user_id: UserId,
    pub lineage: LineageId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Jti>,
}

impl SessionRecord {
    pub fn from_new(session: &NewSession) -> Self {
        Self {
            jti: session.jti,
            user_id: session.user_id,
            lineage: session.lineage,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            revoked_at: None,
            replaced_by: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Marks the record revoked. Returns false if it already was.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        self.revoked_at = Some(now);
        true
    }
}
