use crate::application_port::Clock;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

struct Lineage {
    user_id: UserId,
    records: Vec<SessionRecord>,
}

impl Lineage {
    fn revoke_all(&mut self, now: DateTime<Utc>) -> usize {
        self.records
            .iter_mut()
            .filter(|rec| rec.is_active(now))
            .map(|rec| rec.revoke(now))
            .filter(|revoked| *revoked)
            .count()
    }

}

/// Process-local session store.
///
/// All records of a lineage live behind one `lineages` entry, so every
/// mutation of a lineage is serialized by that entry's shard lock. Device
/// slots hand over under their own entry lock, so concurrent logins on one
/// device leave exactly the last one standing. Lock order is `by_user` →
/// `devices` → `lineages` → `by_jti`; no guard on a later map is held while an
/// earlier one is acquired.
pub struct InMemoryAuthSessionStore {
    lineages: DashMap<LineageId, Lineage>,
    by_jti: DashMap<Jti, LineageId>,
    by_user: DashMap<UserId, HashSet<LineageId>>,
    devices: DashMap<(UserId, String), LineageId>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAuthSessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            lineages: DashMap::new(),
            by_jti: DashMap::new(),
            by_user: DashMap::new(),
            devices: DashMap::new(),
            clock,
        }
    }

    fn lineage_of(&self, jti: &Jti) -> Option<LineageId> {
        self.by_jti.get(jti).map(|entry| *entry.value())
    }

    fn lineages_of(&self, user_id: UserId) -> Vec<LineageId> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn revoke_lineage_at(&self, lineage: LineageId, now: DateTime<Utc>) -> usize {
        self.lineages
            .get_mut(&lineage)
            .map(|mut entry| entry.revoke_all(now))
            .unwrap_or(0)
    }

    /// Hands the device slot to `lineage` and ends whichever lineage held it.
    fn claim_device(&self, user_id: UserId, device: &str, lineage: LineageId, now: DateTime<Utc>) {
        let mut slot = self
            .devices
            .entry((user_id, device.to_string()))
            .or_insert(lineage);
        let previous = std::mem::replace(slot.value_mut(), lineage);
        if previous != lineage {
            let revoked = self.revoke_lineage_at(previous, now);
            debug!(%user_id, lineage = %previous, revoked, "replaced by newer login on same device");
        }
    }
}

#[async_trait::async_trait]
impl AuthSessionStore for InMemoryAuthSessionStore {
    async fn create(&self, session: NewSession) -> Result<(), SessionStoreError> {
        let now = self.clock.now();

        match self.by_jti.entry(session.jti) {
            Entry::Occupied(_) => return Err(SessionStoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(session.lineage);
            }
        }

        match self.lineages.entry(session.lineage) {
            Entry::Occupied(_) => {
                self.by_jti.remove(&session.jti);
                return Err(SessionStoreError::Conflict);
            }
            Entry::Vacant(slot) => {
                slot.insert(Lineage {
                    user_id: session.user_id,
                    records: vec![SessionRecord::from_new(&session)],
                });
            }
        }

        self.by_user
            .entry(session.user_id)
            .or_default()
            .insert(session.lineage);

        if let Some(device) = session.device.as_deref() {
            self.claim_device(session.user_id, device, session.lineage, now);
        }
        Ok(())
    }

    async fn rotate(
        &self,
        old_jti: &Jti,
        user_id: UserId,
        new_jti: &Jti,
        new_expires_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let now = self.clock.now();
        let lineage_id = self.lineage_of(old_jti).ok_or(SessionStoreError::NotFound)?;

        let mut lineage = self
            .lineages
            .get_mut(&lineage_id)
            .ok_or(SessionStoreError::NotFound)?;
        if lineage.user_id != user_id {
            return Err(SessionStoreError::NotFound);
        }

        let idx = lineage
            .records
            .iter()
            .position(|rec| rec.jti == *old_jti)
            .ok_or(SessionStoreError::NotFound)?;
        let old = &lineage.records[idx];
        if old.is_revoked() {
            return Err(SessionStoreError::Revoked);
        }
        if old.is_expired(now) {
            return Err(SessionStoreError::Expired);
        }

        match self.by_jti.entry(*new_jti) {
            Entry::Occupied(_) => return Err(SessionStoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(lineage_id);
            }
        }

        let old = &mut lineage.records[idx];
        old.revoke(now);
        old.replaced_by = Some(*new_jti);
        lineage.records.push(SessionRecord {
            jti: *new_jti,
            user_id,
            lineage: lineage_id,
            issued_at: now,
            expires_at: new_expires_at,
            revoked_at: None,
            replaced_by: None,
        });
        Ok(())
    }

    async fn revoke(&self, jti: &Jti) -> Result<(), SessionStoreError> {
        let now = self.clock.now();
        let Some(lineage_id) = self.lineage_of(jti) else {
            return Ok(());
        };
        if let Some(mut lineage) = self.lineages.get_mut(&lineage_id) {
            if let Some(rec) = lineage.records.iter_mut().find(|rec| rec.jti == *jti) {
                rec.revoke(now);
            }
        }
        Ok(())
    }

    async fn revoke_lineage(&self, lineage: LineageId) -> Result<usize, SessionStoreError> {
        Ok(self.revoke_lineage_at(lineage, self.clock.now()))
    }

    async fn revoke_user(&self, user_id: UserId) -> Result<usize, SessionStoreError> {
        let now = self.clock.now();
        Ok(self
            .lineages_of(user_id)
            .into_iter()
            .map(|id| self.revoke_lineage_at(id, now))
            .sum())
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
        let Some(lineage_id) = self.lineage_of(jti) else {
            return Ok(None);
        };
        Ok(self.lineages.get(&lineage_id).and_then(|lineage| {
            lineage
                .records
                .iter()
                .find(|rec| rec.jti == *jti)
                .cloned()
        }))
    }

    async fn sweep(&self, grace: Duration) -> Result<usize, SessionStoreError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(grace)
            .ok_or_else(|| SessionStoreError::Unavailable("sweep grace out of range".into()))?;
        let mut removed = 0;

        self.lineages.retain(|_, lineage| {
            lineage.records.retain(|rec| {
                let keep = rec.expires_at > cutoff;
                if !keep {
                    self.by_jti.remove(&rec.jti);
                    removed += 1;
                }
                keep
            });
            !lineage.records.is_empty()
        });

        self.by_user.retain(|_, ids| {
            ids.retain(|id| self.lineages.contains_key(id));
            !ids.is_empty()
        });
        self.devices.retain(|_, id| self.lineages.contains_key(id));

        Ok(removed)
    }
}
