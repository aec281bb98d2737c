use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Credential table held in memory, keyed by normalized email. Backs the dev
/// profile and tests.
pub struct InMemoryCredentialRepo {
    hasher: Arc<dyn CredentialHasher>,
    by_email: DashMap<String, CredentialRecord>,
}

impl InMemoryCredentialRepo {
    pub fn new(hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            hasher,
            by_email: DashMap::new(),
        }
    }

    /// Hashes `password` and stores a new active account. Re-registering an
    /// email replaces its password but keeps the user id.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserId, CredentialError> {
        let email = normalize_email(email);
        let password_hash = self.hasher.hash_password(password).await?;

        let mut rec = self
            .by_email
            .entry(email.clone())
            .or_insert_with(|| CredentialRecord {
                user_id: UserId(uuid::Uuid::new_v4()),
                email,
                password_hash: String::new(),
                is_active: true,
                created_at: Utc::now(),
            });
        rec.password_hash = password_hash;
        Ok(rec.user_id)
    }

    pub fn set_active(&self, email: &str, is_active: bool) {
        if let Some(mut rec) = self.by_email.get_mut(&normalize_email(email)) {
            rec.is_active = is_active;
        }
    }
}

#[async_trait::async_trait]
impl CredentialRepo for InMemoryCredentialRepo {
    async fn get_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        Ok(self.by_email.get(email).map(|rec| rec.value().clone()))
    }
}
