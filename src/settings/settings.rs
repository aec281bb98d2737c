use crate::application_port::ReusePolicy;
use anyhow::{Context, Result, anyhow, bail};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub session: Session,
    pub credentials: Credentials,
    pub http: Http,
    pub log: Log,
}

/// A string that never shows up in logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    /// Environment variable holding the HS256 signing key.
    pub signing_key_env: String,
    /// Used when `signing_key_env` is unset. Dev profiles only.
    pub dev_signing_key: Option<Secret>,
    pub reuse_policy: ReusePolicy,
}

impl Auth {
    pub fn signing_key(&self) -> Result<Vec<u8>> {
        match std::env::var(&self.signing_key_env) {
            Ok(key) => Ok(key.into_bytes()),
            Err(_) => self
                .dev_signing_key
                .as_ref()
                .map(|key| key.0.clone().into_bytes())
                .ok_or_else(|| anyhow!("{} is not set", self.signing_key_env)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub backend: String, // "memory" or "redis"
    pub redis_url: Option<Secret>,
    pub key_prefix: String,
    pub sweep_interval_secs: u64,
    /// How long expired records are kept around before the sweeper drops them.
    pub sweep_grace_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub email: String,
    pub password: Secret,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub backend: String, // "memory" or "mysql"
    pub mysql_dsn: Option<Secret>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

/// Ten years. Keeps every expiry computation inside the calendar.
const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;
const MAX_SWEEP_GRACE_SECS: i64 = 365 * 24 * 60 * 60;

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.auth.access_ttl_secs <= 0 || self.auth.refresh_ttl_secs <= 0 {
            bail!("token ttls must be positive");
        }
        if self.auth.access_ttl_secs > MAX_TTL_SECS || self.auth.refresh_ttl_secs > MAX_TTL_SECS {
            bail!("token ttls must not exceed {} seconds", MAX_TTL_SECS);
        }
        if self.auth.access_ttl_secs >= self.auth.refresh_ttl_secs {
            bail!("access_ttl_secs must be shorter than refresh_ttl_secs");
        }
        if self.session.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be positive");
        }
        if self.session.sweep_grace_secs < 0 {
            bail!("sweep_grace_secs must not be negative");
        }
        if self.session.sweep_grace_secs > MAX_SWEEP_GRACE_SECS {
            bail!("sweep_grace_secs must not exceed {} seconds", MAX_SWEEP_GRACE_SECS);
        }
        match self.session.backend.as_str() {
            "memory" => {}
            "redis" if self.session.redis_url.is_some() => {}
            "redis" => bail!("session.redis_url is required for the redis backend"),
            other => bail!("Unknown session backend: {}", other),
        }
        match self.credentials.backend.as_str() {
            "memory" => {}
            "mysql" if self.credentials.mysql_dsn.is_some() => {}
            "mysql" => bail!("credentials.mysql_dsn is required for the mysql backend"),
            other => bail!("Unknown credentials backend: {}", other),
        }
        if self.http.cert_path.is_some() != self.http.key_path.is_some() {
            bail!("http.cert_path and http.key_path must be set together");
        }
        Ok(())
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

/// Environment overrides use this prefix, e.g. `STOREFRONT__HTTP__ADDRESS`.
const ENV_PREFIX: &str = "STOREFRONT";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__"))
        .build()
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("loading settings from {}", path))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

pub fn parse_settings_str(toml: &str) -> Result<Settings> {
    let settings: Settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

/// A complete in-memory profile, shared by tests across the crate.
#[cfg(test)]
pub(crate) const TEST_SETTINGS: &str = r#"
[auth]
issuer = "storefront.auth"
audience = "storefront"
access_ttl_secs = 900
refresh_ttl_secs = 1209600
signing_key_env = "STOREFRONT_TEST_UNSET_KEY"
dev_signing_key = "dev-only-signing-key-0123456789abcdef"
reuse_policy = "lineage"

[session]
backend = "memory"
key_prefix = "auth"
sweep_interval_secs = 60
sweep_grace_secs = 3600

[credentials]
backend = "memory"

[[credentials.users]]
email = "a@x.com"
password = "pw1"

[http]
address = "127.0.0.1:8080"

[log]
filter = "info"
"#;
