use crate::application_port::Clock;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::debug;

const COMMON: &str = include_str!("session_common.lua");
const CREATE: &str = include_str!("session_create.lua");
const ROTATE: &str = include_str!("session_rotate.lua");
const REVOKE: &str = include_str!("session_revoke.lua");
const REVOKE_LINEAGE: &str = include_str!("session_revoke_lineage.lua");
const REVOKE_USER: &str = include_str!("session_revoke_user.lua");

const RECORD_FIELDS: &[&str] = &["user", "lineage", "iat", "exp", "revoked", "replaced_by"];

fn with_common(body: &str) -> Script {
    Script::new(&format!("{}\n{}", COMMON, body))
}

/// Session store shared by every server instance. Each mutation is a single
/// Lua script, so Redis executes it atomically.
///
/// Records are kept until `retention` after their expiry so a replayed token
/// still reads as revoked rather than unknown.
///
/// Every key lives under the hash tag `{prefix}`. Scripts that walk a
/// lineage or user set derive member keys from the prefix, and the shared tag
/// keeps those keys in the same cluster slot as the declared ones.
pub struct RedisAuthSessionStore {
    conn: ConnectionManager,
    prefix: String,
    retention: Duration,
    clock: Arc<dyn Clock>,
    create: Script,
    rotate: Script,
    revoke: Script,
    revoke_lineage: Script,
    revoke_user: Script,
}

impl RedisAuthSessionStore {
    pub fn new(
        conn: ConnectionManager,
        prefix: impl Into<String>,
        retention: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prefix: String = prefix.into();
        RedisAuthSessionStore {
            conn,
            prefix: hash_tag(&prefix),
            retention,
            clock,
            create: with_common(CREATE),
            rotate: with_common(ROTATE),
            revoke: with_common(REVOKE),
            revoke_lineage: with_common(REVOKE_LINEAGE),
            revoke_user: with_common(REVOKE_USER),
        }
    }

    fn record_key(&self, jti: &Jti) -> String {
        format!("{}:rt:{}", self.prefix, jti)
    }

    fn lineage_key(&self, lineage: LineageId) -> String {
        format!("{}:lineage:{}", self.prefix, lineage)
    }

    fn user_key(&self, user_id: UserId) -> String {
        format!("{}:user:{}", self.prefix, user_id)
    }

    fn device_key(&self, user_id: UserId, device: &str) -> String {
        format!("{}:device:{}:{}", self.prefix, user_id, device)
    }

    /// Unix second at which Redis may drop a record expiring at `expires_at`.
    fn keep_until(
        expires_at: DateTime<Utc>,
        retention: Duration,
    ) -> Result<i64, SessionStoreError> {
        expires_at
            .checked_add_signed(retention)
            .map(|at| at.timestamp())
            .ok_or_else(|| SessionStoreError::Unavailable("retention out of range".into()))
    }

    fn parse_record(
        jti: &Jti,
        fields: Vec<Option<String>>,
    ) -> Result<Option<SessionRecord>, SessionStoreError> {
        let corrupt = |what: &str| {
            SessionStoreError::Unavailable(format!("corrupt session record {}: {}", jti, what))
        };
        let unix = |s: &str| -> Result<DateTime<Utc>, SessionStoreError> {
            s.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| corrupt("timestamp"))
        };

        let [user, lineage, iat, exp, revoked, replaced_by] = fields.as_slice() else {
            return Err(corrupt("field count"));
        };
        let (Some(user), Some(lineage), Some(iat), Some(exp)) = (user, lineage, iat, exp) else {
            return Ok(None);
        };

        let revoked_at = match revoked.as_deref() {
            None | Some("") => None,
            Some(s) => Some(unix(s)?),
        };
        let replaced_by = match replaced_by.as_deref() {
            None | Some("") => None,
            Some(s) => Some(s.parse::<Jti>().map_err(|_| corrupt("replaced_by"))?),
        };

        Ok(Some(SessionRecord {
            jti: *jti,
            user_id: user.parse().map_err(|_| corrupt("user"))?,
            lineage: lineage.parse().map_err(|_| corrupt("lineage"))?,
            issued_at: unix(iat)?,
            expires_at: unix(exp)?,
            revoked_at,
            replaced_by,
        }))
    }
}

fn hash_tag(prefix: &str) -> String {
    format!("{{{}}}", prefix.trim_matches(|c| c == '{' || c == '}'))
}

fn store_err(e: redis::RedisError) -> SessionStoreError {
    SessionStoreError::Unavailable(e.to_string())
}

#[async_trait::async_trait]
impl AuthSessionStore for RedisAuthSessionStore {
    async fn create(&self, session: NewSession) -> Result<(), SessionStoreError> {
        let now = self.clock.now().timestamp();
        let keep_until = Self::keep_until(session.expires_at, self.retention)?;
        let device_key = session
            .device
            .as_deref()
            .map(|device| self.device_key(session.user_id, device))
            .unwrap_or_else(|| format!("{}:device:none", self.prefix));

        let mut conn = self.conn.clone();
        let mut invocation = self.create.prepare_invoke();
        invocation
            .key(self.record_key(&session.jti))
            .key(self.lineage_key(session.lineage))
            .key(self.user_key(session.user_id))
            .key(device_key)
            .arg(&self.prefix)
            .arg(session.jti.to_string())
            .arg(session.user_id.to_string())
            .arg(session.lineage.to_string())
            .arg(session.issued_at.timestamp())
            .arg(session.expires_at.timestamp())
            .arg(keep_until)
            .arg(now)
            .arg(if session.device.is_some() { "1" } else { "0" });
        let status: i64 = invocation.invoke_async(&mut conn).await.map_err(store_err)?;

        match status {
            1 => Ok(()),
            _ => Err(SessionStoreError::Conflict),
        }
    }

    async fn rotate(
        &self,
        old_jti: &Jti,
        user_id: UserId,
        new_jti: &Jti,
        new_expires_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let now = self.clock.now().timestamp();
        let keep_until = Self::keep_until(new_expires_at, self.retention)?;
        let mut conn = self.conn.clone();
        let mut invocation = self.rotate.prepare_invoke();
        invocation
            .key(self.record_key(old_jti))
            .key(self.record_key(new_jti))
            .key(self.user_key(user_id))
            .arg(&self.prefix)
            .arg(user_id.to_string())
            .arg(new_jti.to_string())
            .arg(new_expires_at.timestamp())
            .arg(keep_until)
            .arg(now);
        let status: i64 = invocation.invoke_async(&mut conn).await.map_err(store_err)?;

        match status {
            1 => Ok(()),
            -1 => Err(SessionStoreError::NotFound),
            -2 => Err(SessionStoreError::Revoked),
            -3 => Err(SessionStoreError::Expired),
            -4 => Err(SessionStoreError::Conflict),
            other => Err(SessionStoreError::Unavailable(format!(
                "unknown rotate status {}",
                other
            ))),
        }
    }

    async fn revoke(&self, jti: &Jti) -> Result<(), SessionStoreError> {
        let mut conn = self.conn.clone();
        let revoked: i64 = self
            .revoke
            .key(self.record_key(jti))
            .arg(self.clock.now().timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        debug!(%jti, revoked, "revoke");
        Ok(())
    }

    async fn revoke_lineage(&self, lineage: LineageId) -> Result<usize, SessionStoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.revoke_lineage.prepare_invoke();
        invocation
            .key(self.lineage_key(lineage))
            .arg(&self.prefix)
            .arg(self.clock.now().timestamp());
        let revoked: usize = invocation.invoke_async(&mut conn).await.map_err(store_err)?;
        Ok(revoked)
    }

    async fn revoke_user(&self, user_id: UserId) -> Result<usize, SessionStoreError> {
        let mut conn = self.conn.clone();
        let revoked: usize = self
            .revoke_user
            .key(self.user_key(user_id))
            .arg(&self.prefix)
            .arg(self.clock.now().timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(revoked)
    }

    async fn is_active(&self, jti: &Jti) -> Result<bool, SessionStoreError> {
        let now = self.clock.now();
        Ok(self
            .get(jti)
            .await?
            .map(|rec| rec.is_active(now))
            .unwrap_or(false))
    }

    async fn get(&self, jti: &Jti) -> Result<Option<SessionRecord>, SessionStoreError> {
        let mut conn = self.conn.clone();
        let fields: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.record_key(jti))
            .arg(RECORD_FIELDS)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Self::parse_record(jti, fields)
    }

    async fn sweep(&self, _grace: Duration) -> Result<usize, SessionStoreError> {
        // records carry EXPIREAT; Redis drops them on its own
        Ok(0)
    }
}
