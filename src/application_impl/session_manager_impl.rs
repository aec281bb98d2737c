use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bound on reissuing after a jti collision in the store.
const MAX_ISSUE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reuse_policy: ReusePolicy,
}

pub struct RealSessionManager {
    verifier: Arc<dyn CredentialVerifier>,
    token_codec: Arc<dyn TokenCodec>,
    session_store: Arc<dyn AuthSessionStore>,
    cfg: SessionConfig,
}

impl RealSessionManager {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        token_codec: Arc<dyn TokenCodec>,
        session_store: Arc<dyn AuthSessionStore>,
        cfg: SessionConfig,
    ) -> Self {
        Self {
            verifier,
            token_codec,
            session_store,
            cfg,
        }
    }

    async fn parse_as(&self, token: &str, class: TokenClass) -> Result<TokenClaims, AuthError> {
        let claims = self.token_codec.parse(token).await?;
        if claims.class != class {
            debug!(expected = %class, got = %claims.class, "token class mismatch");
            return Err(AuthError::Unauthorized);
        }
        Ok(claims)
    }

    async fn issue(
        &self,
        subject: &Identity,
        class: TokenClass,
        lineage: LineageId,
    ) -> Result<IssuedToken, AuthError> {
        let ttl = match class {
            TokenClass::Access => self.cfg.access_ttl,
            TokenClass::Refresh => self.cfg.refresh_ttl,
        };
        Ok(self.token_codec.issue(subject, class, lineage, ttl).await?)
    }

    fn tokens(access: IssuedToken, refresh: IssuedToken) -> AuthTokens {
        AuthTokens {
            access_token_expires_at: access.claims.expires_at,
            refresh_token_expires_at: refresh.claims.expires_at,
            access_token: AccessToken(access.token),
            refresh_token: RefreshToken(refresh.token),
        }
    }

    /// A rotated-away refresh token came back: somebody holds a copy.
    async fn contain_reuse(&self, claims: &TokenClaims) -> Result<(), AuthError> {
        warn!(
            user_id = %claims.subject.id,
            lineage = %claims.lineage,
            jti = %claims.jti,
            "refresh token reuse detected"
        );

        let revoked = match self.cfg.reuse_policy {
            ReusePolicy::Lineage => self.session_store.revoke_lineage(claims.lineage).await?,
            ReusePolicy::User => self.session_store.revoke_user(claims.subject.id).await?,
        };
        info!(user_id = %claims.subject.id, revoked, "sessions revoked after reuse");
        Ok(())
    }

    fn collision_exhausted() -> AuthError {
        AuthError::Unavailable("could not allocate a unique refresh token id".to_string())
    }
}

#[async_trait::async_trait]
impl SessionManager for RealSessionManager {
    async fn login(&self, input: LoginInput) -> Result<LoginResult, AuthError> {
        let LoginInput {
            email,
            password,
            device,
        } = input;

        let identity = self.verifier.verify(&email, &password).await?;
        let lineage = LineageId::new();

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let refresh = self.issue(&identity, TokenClass::Refresh, lineage).await?;
            let session = NewSession {
                user_id: identity.id,
                jti: refresh.claims.jti,
                lineage,
                device: device.clone(),
                issued_at: refresh.claims.issued_at,
                expires_at: refresh.claims.expires_at,
            };

            match self.session_store.create(session).await {
                Ok(()) => {
                    let access = self.issue(&identity, TokenClass::Access, lineage).await?;
                    info!(user_id = %identity.id, %lineage, "login succeeded");
                    return Ok(LoginResult {
                        identity,
                        tokens: Self::tokens(access, refresh),
                    });
                }
                Err(SessionStoreError::Conflict) => {
                    warn!(attempt, "refresh token id collision on login, reissuing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Self::collision_exhausted())
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshResult, AuthError> {
        let claims = self.parse_as(refresh_token, TokenClass::Refresh).await?;

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let next = self
                .issue(&claims.subject, TokenClass::Refresh, claims.lineage)
                .await?;

            match self
                .session_store
                .rotate(
                    &claims.jti,
                    claims.subject.id,
                    &next.claims.jti,
                    next.claims.expires_at,
                )
                .await
            {
                Ok(()) => {
                    let access = self
                        .issue(&claims.subject, TokenClass::Access, claims.lineage)
                        .await?;
                    debug!(user_id = %claims.subject.id, lineage = %claims.lineage, "refresh token rotated");
                    return Ok(RefreshResult {
                        identity: claims.subject,
                        tokens: Self::tokens(access, next),
                    });
                }
                Err(SessionStoreError::Revoked) => {
                    self.contain_reuse(&claims).await?;
                    return Err(AuthError::Unauthorized);
                }
                Err(SessionStoreError::Conflict) => {
                    warn!(attempt, "refresh token id collision on rotation, reissuing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Self::collision_exhausted())
    }

    async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.token_codec.parse(refresh_token).await?;
        self.session_store.revoke(&claims.jti).await?;
        debug!(user_id = %claims.subject.id, jti = %claims.jti, "refresh token revoked");
        Ok(())
    }

    async fn authenticate(&self, access_token: &str) -> Result<Identity, AuthError> {
        let claims = self.parse_as(access_token, TokenClass::Access).await?;
        Ok(claims.subject)
    }

    async fn revoke_all_sessions(&self, user_id: UserId) -> Result<usize, AuthError> {
        let revoked = self.session_store.revoke_user(user_id).await?;
        info!(%user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{JwtConfig, JwtHs256Codec, ManualClock, SigningKey};
    use crate::infra_memory::InMemoryAuthSessionStore;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubVerifier {
        identity: Identity,
        password: &'static str,
        down: AtomicBool,
    }

    #[async_trait::async_trait]
    impl CredentialVerifier for StubVerifier {
        async fn verify(&self, email: &str, password: &str) -> Result<Identity, CredentialError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CredentialError::Unavailable("db down".into()));
            }
            if email == self.identity.email && password == self.password {
                Ok(self.identity.clone())
            } else {
                Err(CredentialError::InvalidCredentials)
            }
        }
    }

    /// Reports a jti collision on the first `create`, then delegates.
    struct CollidingOnce {
        inner: InMemoryAuthSessionStore,
        collided: AtomicBool,
    }

    #[async_trait::async_trait]
    impl AuthSessionStore for CollidingOnce {
        async fn create(&self, session: NewSession) -> Result<(), SessionStoreError> {
            if !self.collided.swap(true, Ordering::SeqCst) {
                return Err(SessionStoreError::Conflict);
            }
            self.inner.create(session).await
        }
        async fn rotate(
            &self,
            old_jti: &Jti,
            user_id: UserId,
            new_jti: &Jti,
            new_expires_at: DateTime<Utc>,
        ) -> Result<(), SessionStoreError> {
            self.inner.rotate(old_jti, user_id, new_jti, new_expires_at).await
        }
        async fn revoke(&self, jti: &Jti) -> Result<(), SessionStoreError> {
            self.inner.revoke(jti).await
        }
        async fn revoke_lineage(&self, lineage: LineageId) -> Result<usize, SessionStoreError> {
            self.inner.revoke_lineage(lineage).await
        }
        async fn revoke_user(&self, user_id: UserId) -> Result<usize, SessionStoreError> {
            self.inner.revoke_user(user_id).await
        }
        async fn is_active(&self, jti: &Jti) -> Result<bool, SessionStoreError> {
            self.inner.is_active(jti).await
        }
        async fn get(&self, jti: &Jti) -> Result<Option<SessionRecord>, SessionStoreError> {
            self.inner.get(jti).await
        }
        async fn sweep(&self, grace: Duration) -> Result<usize, SessionStoreError> {
            self.inner.sweep(grace).await
        }
    }

    struct Harness {
        manager: Arc<RealSessionManager>,
        codec: Arc<JwtHs256Codec>,
        store: Arc<InMemoryAuthSessionStore>,
        clock: Arc<ManualClock>,
        verifier: Arc<StubVerifier>,
    }

    fn harness(reuse_policy: ReusePolicy) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = Arc::new(JwtHs256Codec::new(
            JwtConfig {
                issuer: "storefront.auth".into(),
                audience: "storefront".into(),
                signing_key: SigningKey::new(b"0123456789abcdef0123456789abcdef".to_vec())
                    .unwrap(),
            },
            clock.clone(),
        ));
        let store = Arc::new(InMemoryAuthSessionStore::new(clock.clone()));
        let verifier = Arc::new(StubVerifier {
            identity: Identity::new(UserId(uuid::Uuid::new_v4()), "a@x.com"),
            password: "pw1",
            down: AtomicBool::new(false),
        });
        let manager = Arc::new(RealSessionManager::new(
            verifier.clone(),
            codec.clone(),
            store.clone(),
            SessionConfig {
                access_ttl: Duration::minutes(15),
                refresh_ttl: Duration::days(14),
                reuse_policy,
            },
        ));
        Harness {
            manager,
            codec,
            store,
            clock,
            verifier,
        }
    }

    fn login_input(device: Option<&str>) -> LoginInput {
        LoginInput {
            email: "a@x.com".into(),
            password: "pw1".into(),
            device: device.map(str::to_string),
        }
    }

    async fn jti_of(h: &Harness, token: &RefreshToken) -> Jti {
        h.codec.parse(&token.0).await.unwrap().jti
    }

    #[tokio::test]
    async fn login_tokens_carry_the_identity() {
        let h = harness(ReusePolicy::Lineage);
        let res = h.manager.login(login_input(None)).await.unwrap();
        assert_eq!(res.identity.email, "a@x.com");

        let access = h.codec.parse(&res.tokens.access_token.0).await.unwrap();
        let refresh = h.codec.parse(&res.tokens.refresh_token.0).await.unwrap();
        assert_eq!(access.subject, res.identity);
        assert_eq!(refresh.subject, res.identity);
        assert_eq!(access.class, TokenClass::Access);
        assert_eq!(refresh.class, TokenClass::Refresh);
        assert_eq!(access.lineage, refresh.lineage);
        assert!(h.store.is_active(&refresh.jti).await.unwrap());
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized_and_outages_are_not() {
        let h = harness(ReusePolicy::Lineage);
        let mut input = login_input(None);
        input.password = "wrong".into();
        assert_eq!(h.manager.login(input).await.unwrap_err(), AuthError::Unauthorized);

        let mut input = login_input(None);
        input.email = "nobody@x.com".into();
        assert_eq!(h.manager.login(input).await.unwrap_err(), AuthError::Unauthorized);

        h.verifier.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.manager.login(login_input(None)).await,
            Err(AuthError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_replay_is_refused() {
        let h = harness(ReusePolicy::Lineage);
        let first = h.manager.login(login_input(None)).await.unwrap();
        let t_r1 = first.tokens.refresh_token.clone();

        let second = h.manager.refresh_access_token(&t_r1.0).await.unwrap();
        assert_ne!(second.tokens.access_token.0, first.tokens.access_token.0);
        assert_eq!(second.identity, first.identity);

        let old = h.store.get(&jti_of(&h, &t_r1).await).await.unwrap().unwrap();
        let new_jti = jti_of(&h, &second.tokens.refresh_token).await;
        assert!(old.is_revoked());
        assert_eq!(old.replaced_by, Some(new_jti));

        assert_eq!(
            h.manager.refresh_access_token(&t_r1.0).await.unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[tokio::test]
    async fn replay_kills_the_whole_lineage() {
        let h = harness(ReusePolicy::Lineage);
        let login = h.manager.login(login_input(None)).await.unwrap();
        let t_r1 = login.tokens.refresh_token;

        let r2 = h.manager.refresh_access_token(&t_r1.0).await.unwrap();
        let r3 = h
            .manager
            .refresh_access_token(&r2.tokens.refresh_token.0)
            .await
            .unwrap();

        // stolen copy of t_r1 shows up
        assert!(h.manager.refresh_access_token(&t_r1.0).await.is_err());

        let descendant = r3.tokens.refresh_token;
        assert!(!h.store.is_active(&jti_of(&h, &descendant).await).await.unwrap());
        assert_eq!(
            h.manager.refresh_access_token(&descendant.0).await.unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[tokio::test]
    async fn lineage_policy_spares_other_logins() {
        let h = harness(ReusePolicy::Lineage);
        let phone = h.manager.login(login_input(None)).await.unwrap();
        let laptop = h.manager.login(login_input(None)).await.unwrap();

        let token = phone.tokens.refresh_token;
        h.manager.refresh_access_token(&token.0).await.unwrap();
        assert!(h.manager.refresh_access_token(&token.0).await.is_err());

        assert!(h
            .manager
            .refresh_access_token(&laptop.tokens.refresh_token.0)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn user_policy_revokes_every_session() {
        let h = harness(ReusePolicy::User);
        let phone = h.manager.login(login_input(None)).await.unwrap();
        let laptop = h.manager.login(login_input(None)).await.unwrap();

        let token = phone.tokens.refresh_token;
        h.manager.refresh_access_token(&token.0).await.unwrap();
        assert!(h.manager.refresh_access_token(&token.0).await.is_err());

        assert_eq!(
            h.manager
                .refresh_access_token(&laptop.tokens.refresh_token.0)
                .await
                .unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[tokio::test]
    async fn token_classes_are_not_interchangeable() {
        let h = harness(ReusePolicy::Lineage);
        let login = h.manager.login(login_input(None)).await.unwrap();

        assert_eq!(
            h.manager
                .refresh_access_token(&login.tokens.access_token.0)
                .await
                .unwrap_err(),
            AuthError::Unauthorized
        );
        assert_eq!(
            h.manager
                .authenticate(&login.tokens.refresh_token.0)
                .await
                .unwrap_err(),
            AuthError::Unauthorized
        );
        assert_eq!(
            h.manager
                .authenticate(&login.tokens.access_token.0)
                .await
                .unwrap(),
            login.identity
        );
    }

    #[tokio::test]
    async fn access_tokens_stay_valid_until_expiry_even_after_revocation() {
        let h = harness(ReusePolicy::Lineage);
        let login = h.manager.login(login_input(None)).await.unwrap();
        h.manager
            .revoke_refresh_token(&login.tokens.refresh_token.0)
            .await
            .unwrap();

        assert!(h.manager.authenticate(&login.tokens.access_token.0).await.is_ok());
        h.clock.advance(Duration::minutes(16));
        assert!(h.manager.authenticate(&login.tokens.access_token.0).await.is_err());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let h = harness(ReusePolicy::Lineage);
        let login = h.manager.login(login_input(None)).await.unwrap();
        let token = login.tokens.refresh_token;

        assert_eq!(h.manager.revoke_refresh_token(&token.0).await, Ok(()));
        assert_eq!(h.manager.revoke_refresh_token(&token.0).await, Ok(()));
        assert_eq!(
            h.manager.refresh_access_token(&token.0).await.unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[tokio::test]
    async fn revoking_garbage_reveals_nothing() {
        let h = harness(ReusePolicy::Lineage);
        assert_eq!(
            h.manager.revoke_refresh_token("garbage").await.unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[tokio::test]
    async fn expired_refresh_tokens_are_refused() {
        let h = harness(ReusePolicy::Lineage);
        let login = h.manager.login(login_input(None)).await.unwrap();

        h.clock.advance(Duration::days(15));
        assert_eq!(
            h.manager
                .refresh_access_token(&login.tokens.refresh_token.0)
                .await
                .unwrap_err(),
            AuthError::Unauthorized
        );
        assert_eq!(
            h.manager
                .revoke_refresh_token(&login.tokens.refresh_token.0)
                .await
                .unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[tokio::test]
    async fn same_device_login_replaces_previous_session() {
        let h = harness(ReusePolicy::Lineage);
        let first = h.manager.login(login_input(Some("phone"))).await.unwrap();
        let other = h.manager.login(login_input(Some("laptop"))).await.unwrap();
        let second = h.manager.login(login_input(Some("phone"))).await.unwrap();

        assert!(h
            .manager
            .refresh_access_token(&first.tokens.refresh_token.0)
            .await
            .is_err());
        assert!(h
            .manager
            .refresh_access_token(&second.tokens.refresh_token.0)
            .await
            .is_ok());
        assert!(h
            .manager
            .refresh_access_token(&other.tokens.refresh_token.0)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn revoke_all_sessions_ends_every_lineage() {
        let h = harness(ReusePolicy::Lineage);
        let a = h.manager.login(login_input(None)).await.unwrap();
        let b = h.manager.login(login_input(None)).await.unwrap();

        assert_eq!(h.manager.revoke_all_sessions(a.identity.id).await, Ok(2));
        for token in [a.tokens.refresh_token, b.tokens.refresh_token] {
            assert!(h.manager.refresh_access_token(&token.0).await.is_err());
        }
    }

    #[tokio::test]
    async fn login_survives_a_jti_collision() {
        let h = harness(ReusePolicy::Lineage);
        let store = Arc::new(CollidingOnce {
            inner: InMemoryAuthSessionStore::new(h.clock.clone()),
            collided: AtomicBool::new(false),
        });
        let manager = RealSessionManager::new(
            h.verifier.clone(),
            h.codec.clone(),
            store.clone(),
            SessionConfig {
                access_ttl: Duration::minutes(15),
                refresh_ttl: Duration::days(14),
                reuse_policy: ReusePolicy::Lineage,
            },
        );

        let login = manager.login(login_input(None)).await.unwrap();
        let jti = jti_of(&h, &login.tokens.refresh_token).await;
        assert!(store.is_active(&jti).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_have_one_winner() {
        let h = harness(ReusePolicy::Lineage);
        let login = h.manager.login(login_input(None)).await.unwrap();
        let token = login.tokens.refresh_token.0;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = h.manager.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                manager.refresh_access_token(&token).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e, AuthError::Unauthorized),
            }
        }
        assert_eq!(ok, 1);
    }
}
