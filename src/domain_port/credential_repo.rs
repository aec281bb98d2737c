use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Lookup by normalized email.
    async fn get_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, CredentialError>;
}
