use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use uuid::Uuid;

/// Reads the `auth_credential` table (see `sql/auth_credential.sql`).
pub struct MySqlCredentialRepo {
    pool: MySqlPool,
}

impl MySqlCredentialRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlCredentialRepo { pool }
    }

    fn unavailable(e: sqlx::Error) -> CredentialError {
        CredentialError::Unavailable(e.to_string())
    }

    #[inline]
    fn uid_from_bytes(id: &[u8]) -> Result<UserId, CredentialError> {
        Ok(UserId(
            Uuid::from_slice(id).map_err(|e| CredentialError::InternalError(e.to_string()))?,
        ))
    }

    fn row_to_record(row: MySqlRow) -> Result<CredentialRecord, CredentialError> {
        let user_id_bytes: Vec<u8> = row.try_get("user_id").map_err(Self::unavailable)?;
        let user_id = Self::uid_from_bytes(&user_id_bytes)?;

        let email: String = row.try_get("email").map_err(Self::unavailable)?;
        let password_hash: String = row.try_get("password_hash").map_err(Self::unavailable)?;
        let is_active: bool = row.try_get("is_active").map_err(Self::unavailable)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(Self::unavailable)?;

        Ok(CredentialRecord {
            user_id,
            email,
            password_hash,
            is_active,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl CredentialRepo for MySqlCredentialRepo {
    async fn get_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, email, password_hash, is_active, created_at
FROM auth_credential
WHERE email = ?
"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::unavailable)?;

        row_opt.map(Self::row_to_record).transpose()
    }
}
