use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::CredentialRepo;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use std::sync::Arc;

/// Verified against when the email is unknown so both failure paths cost the
/// same.
const TIMING_DUMMY_PASSWORD: &str = "storefront-timing-dummy";

#[derive(Debug, Clone, Default)]
pub struct Argon2PasswordHasher {
    params: Params,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheaper cost parameters, for seeding dev accounts and tests.
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

#[async_trait::async_trait]
impl CredentialHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        let salt = argon2::password_hash::SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::InternalError(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, CredentialError> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|e| CredentialError::InternalError(format!("invalid PHC hash: {}", e)))?;

        // cost parameters come from the PHC string itself
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::InternalError(format!("verify error: {}", e))),
        }
    }
}

pub struct Argon2CredentialVerifier {
    repo: Arc<dyn CredentialRepo>,
    hasher: Arc<dyn CredentialHasher>,
    dummy_hash: String,
}

impl Argon2CredentialVerifier {
    pub async fn try_new(
        repo: Arc<dyn CredentialRepo>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<Self, CredentialError> {
        let dummy_hash = hasher.hash_password(TIMING_DUMMY_PASSWORD).await?;
        Ok(Self {
            repo,
            hasher,
            dummy_hash,
        })
    }
}

#[async_trait::async_trait]
impl CredentialVerifier for Argon2CredentialVerifier {
    async fn verify(&self, email: &str, password: &str) -> Result<Identity, CredentialError> {
        let email = normalize_email(email);

        let Some(rec) = self.repo.get_by_email(&email).await? else {
            let _ = self.hasher.verify_password(password, &self.dummy_hash).await;
            return Err(CredentialError::InvalidCredentials);
        };

        let ok = self
            .hasher
            .verify_password(password, &rec.password_hash)
            .await?;
        if !ok || !rec.is_active {
            return Err(CredentialError::InvalidCredentials);
        }

        Ok(Identity::new(rec.user_id, rec.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::InMemoryCredentialRepo;

    fn cheap_hasher() -> Arc<Argon2PasswordHasher> {
        let params = Params::new(1024, 1, 1, None).unwrap();
        Arc::new(Argon2PasswordHasher::with_params(params))
    }

    async fn verifier() -> (Argon2CredentialVerifier, Arc<InMemoryCredentialRepo>) {
        let hasher = cheap_hasher();
        let repo = Arc::new(InMemoryCredentialRepo::new(hasher.clone()));
        let verifier = Argon2CredentialVerifier::try_new(repo.clone(), hasher)
            .await
            .unwrap();
        (verifier, repo)
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = cheap_hasher();
        let hash = hasher.hash_password("pw1").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify_password("pw1", &hash).await.unwrap());
        assert!(!hasher.verify_password("pw2", &hash).await.unwrap());
        assert!(hasher.verify_password("pw1", "not-a-phc").await.is_err());
    }

    #[tokio::test]
    async fn accepts_known_pair_with_any_email_casing() {
        let (verifier, repo) = verifier().await;
        let id = repo.register("a@x.com", "pw1").await.unwrap();

        let who = verifier.verify(" A@X.com", "pw1").await.unwrap();
        assert_eq!(who, Identity::new(id, "a@x.com"));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (verifier, repo) = verifier().await;
        repo.register("a@x.com", "pw1").await.unwrap();

        let wrong_password = verifier.verify("a@x.com", "nope").await.unwrap_err();
        let unknown_email = verifier.verify("b@x.com", "pw1").await.unwrap_err();
        assert_eq!(wrong_password, CredentialError::InvalidCredentials);
        assert_eq!(unknown_email, wrong_password);
    }

    #[tokio::test]
    async fn inactive_accounts_cannot_log_in() {
        let (verifier, repo) = verifier().await;
        repo.register("a@x.com", "pw1").await.unwrap();
        repo.set_active("a@x.com", false);

        assert_eq!(
            verifier.verify("a@x.com", "pw1").await.unwrap_err(),
            CredentialError::InvalidCredentials
        );
    }
}
