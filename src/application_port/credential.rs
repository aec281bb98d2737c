use crate::application_port::AuthError;
use crate::domain_model::Identity;
use tracing::{debug, error};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidCredentials => {
                debug!("login rejected: invalid credentials");
                AuthError::Unauthorized
            }
            CredentialError::Unavailable(e) | CredentialError::InternalError(e) => {
                error!("credential verification failed: {}", e);
                AuthError::Unavailable(e)
            }
        }
    }
}

#[async_trait::async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Unknown emails and wrong passwords both yield `InvalidCredentials`.
    async fn verify(&self, email: &str, password: &str) -> Result<Identity, CredentialError>;
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, CredentialError>;
    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, CredentialError>;
}
