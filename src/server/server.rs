use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::server::*;
use crate::settings::Settings;
use anyhow::bail;
use sqlx::{MySql, Pool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Server {
    pub session_manager: Arc<dyn SessionManager>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(
            JwtConfig {
                issuer: settings.auth.issuer.clone(),
                audience: settings.auth.audience.clone(),
                signing_key: SigningKey::new(settings.auth.signing_key()?)?,
            },
            clock.clone(),
        ));

        let grace = chrono::Duration::seconds(settings.session.sweep_grace_secs);
        let session_store: Arc<dyn AuthSessionStore> = match settings.session.backend.as_str() {
            "memory" => Arc::new(InMemoryAuthSessionStore::new(clock.clone())),
            "redis" => {
                let Some(url) = settings.session.redis_url.as_ref() else {
                    bail!("session.redis_url is required for the redis backend");
                };
                let redis_client = redis::Client::open(url.0.as_str())?;
                let redis_manager = redis_client.get_connection_manager().await?;
                Arc::new(RedisAuthSessionStore::new(
                    redis_manager,
                    settings.session.key_prefix.clone(),
                    grace,
                    clock.clone(),
                ))
            }
            other => bail!("Unknown session backend: {}", other),
        };

        let credential_hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2PasswordHasher::new());
        let mut pool = None;
        let credential_repo: Arc<dyn CredentialRepo> = match settings.credentials.backend.as_str() {
            "memory" => {
                let repo = InMemoryCredentialRepo::new(credential_hasher.clone());
                for user in &settings.credentials.users {
                    let user_id = repo.register(&user.email, &user.password.0).await?;
                    debug!(%user_id, email = %user.email, "seeded account");
                }
                Arc::new(repo)
            }
            "mysql" => {
                let Some(dsn) = settings.credentials.mysql_dsn.as_ref() else {
                    bail!("credentials.mysql_dsn is required for the mysql backend");
                };
                let mysql = Pool::<MySql>::connect(&dsn.0).await?;
                pool = Some(mysql.clone());
                Arc::new(MySqlCredentialRepo::new(mysql))
            }
            other => bail!("Unknown credentials backend: {}", other),
        };
        if settings.credentials.backend != "memory" && !settings.credentials.users.is_empty() {
            warn!("credentials.users is ignored by the {} backend", settings.credentials.backend);
        }

        let verifier: Arc<dyn CredentialVerifier> =
            Arc::new(Argon2CredentialVerifier::try_new(credential_repo, credential_hasher).await?);

        let session_manager: Arc<dyn SessionManager> = Arc::new(RealSessionManager::new(
            verifier,
            token_codec,
            session_store.clone(),
            SessionConfig {
                access_ttl: chrono::Duration::seconds(settings.auth.access_ttl_secs),
                refresh_ttl: chrono::Duration::seconds(settings.auth.refresh_ttl_secs),
                reuse_policy: settings.auth.reuse_policy,
            },
        ));

        // region runtime infra
        let cancel = CancellationToken::new();

        let sweeper = SessionSweeper::new(
            session_store,
            Duration::from_secs(settings.session.sweep_interval_secs),
            grace,
            cancel.clone(),
        );
        let sweeper_handle = tokio::spawn(async move {
            sweeper.run().await;
        });

        // endregion

        info!(
            session_backend = %settings.session.backend,
            credentials_backend = %settings.credentials.backend,
            "server started"
        );

        Ok(Self {
            session_manager,
            sweeper_handle: Mutex::new(Some(sweeper_handle)),
            cancel,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let handle = self
            .sweeper_handle
            .lock()
            .map(|mut lock| lock.take())
            .unwrap_or_else(|e| e.into_inner().take());
        if let Some(handle) = handle {
            let r = handle.await;
            info!("sweeper handle dropped: {:?}", r);
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
