use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// HMAC secret. Never printed.
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, TokenError> {
        if bytes.len() < MIN_SIGNING_KEY_LEN {
            return Err(TokenError::Internal(format!(
                "signing key must be at least {} bytes",
                MIN_SIGNING_KEY_LEN
            )));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

#[derive(Debug)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub signing_key: SigningKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // user id
    email: String,
    cls: TokenClass,
    sid: String, // lineage id
    jti: String,
    iat: i64,
    exp: i64,
    iss: String,
    aud: String,
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

pub struct JwtHs256Codec {
    issuer: String,
    audience: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against the injected clock instead
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.set_audience(&[cfg.audience.clone()]);
        validation.set_issuer(&[cfg.issuer.clone()]);

        JwtHs256Codec {
            encoding_key: EncodingKey::from_secret(&cfg.signing_key.0),
            decoding_key: DecodingKey::from_secret(&cfg.signing_key.0),
            issuer: cfg.issuer,
            audience: cfg.audience,
            validation,
            clock,
        }
    }

    fn into_token_claims(claims: Claims) -> Result<TokenClaims, TokenError> {
        let id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| TokenError::Malformed)?;
        let jti = claims.jti.parse::<Jti>().map_err(|_| TokenError::Malformed)?;
        let lineage = claims
            .sid
            .parse::<LineageId>()
            .map_err(|_| TokenError::Malformed)?;
        let issued_at = from_unix(claims.iat).ok_or(TokenError::Malformed)?;
        let expires_at = from_unix(claims.exp).ok_or(TokenError::Malformed)?;

        Ok(TokenClaims {
            subject: Identity::new(id, claims.email),
            class: claims.cls,
            jti,
            lineage,
            issued_at,
            expires_at,
        })
    }
}

#[async_trait::async_trait]
impl TokenCodec for JwtHs256Codec {
    async fn issue(
        &self,
        subject: &Identity,
        class: TokenClass,
        lineage: LineageId,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::Internal("token ttl must be positive".into()));
        }

        let now = self.clock.now();
        let iat = now.timestamp();
        let expiry = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Internal("token ttl out of range".into()))?;
        // `exp` has whole-second resolution; round up so the token is never
        // born expired
        let exp = expiry.timestamp() + i64::from(expiry.timestamp_subsec_nanos() > 0);
        let jti = Jti::new();

        let claims = Claims {
            sub: subject.id.to_string(),
            email: subject.email.clone(),
            cls: class,
            sid: lineage.to_string(),
            jti: jti.to_string(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Internal(e.to_string()))?;

        let issued_at = from_unix(iat).ok_or_else(|| TokenError::Internal("bad clock".into()))?;
        let expires_at = from_unix(exp).ok_or_else(|| TokenError::Internal("bad ttl".into()))?;
        Ok(IssuedToken {
            token,
            claims: TokenClaims {
                subject: subject.clone(),
                class,
                jti,
                lineage,
                issued_at,
                expires_at,
            },
        })
    }

    async fn parse(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::Signature,
                _ => TokenError::Malformed,
            }
        })?;

        let claims = Self::into_token_claims(data.claims)?;
        if self.clock.now() > claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::ManualClock;
    use chrono::TimeZone;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn codec_with(key: &[u8], audience: &str, clock: Arc<ManualClock>) -> JwtHs256Codec {
        JwtHs256Codec::new(
            JwtConfig {
                issuer: "storefront.auth".into(),
                audience: audience.into(),
                signing_key: SigningKey::new(key.to_vec()).unwrap(),
            },
            clock,
        )
    }

    fn identity() -> Identity {
        Identity::new(UserId(uuid::Uuid::new_v4()), "a@x.com")
    }

    #[tokio::test]
    async fn parse_returns_what_issue_encoded() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = codec_with(KEY, "storefront", clock);
        let who = identity();
        let lineage = LineageId::new();

        for class in [TokenClass::Access, TokenClass::Refresh] {
            for ttl in [Duration::seconds(1), Duration::minutes(15), Duration::days(14)] {
                let issued = codec.issue(&who, class, lineage, ttl).await.unwrap();
                let claims = codec.parse(&issued.token).await.unwrap();
                assert_eq!(claims.subject, who);
                assert_eq!(claims.class, class);
                assert_eq!(claims, issued.claims);
            }
        }
    }

    #[tokio::test]
    async fn every_token_gets_a_fresh_jti() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = codec_with(KEY, "storefront", clock);
        let who = identity();
        let lineage = LineageId::new();

        let a = codec
            .issue(&who, TokenClass::Access, lineage, Duration::minutes(5))
            .await
            .unwrap();
        let b = codec
            .issue(&who, TokenClass::Access, lineage, Duration::minutes(5))
            .await
            .unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected_for_any_class() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = codec_with(KEY, "storefront", clock.clone());
        let who = identity();

        let access = codec
            .issue(&who, TokenClass::Access, LineageId::new(), Duration::minutes(15))
            .await
            .unwrap();
        let refresh = codec
            .issue(&who, TokenClass::Refresh, LineageId::new(), Duration::days(1))
            .await
            .unwrap();

        clock.advance(Duration::minutes(16));
        assert_eq!(codec.parse(&access.token).await, Err(TokenError::Expired));
        assert!(codec.parse(&refresh.token).await.is_ok());

        clock.advance(Duration::days(1));
        assert_eq!(codec.parse(&refresh.token).await, Err(TokenError::Expired));
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ours = codec_with(KEY, "storefront", clock.clone());
        let theirs = codec_with(b"ffffffffffffffffffffffffffffffff", "storefront", clock);

        let forged = theirs
            .issue(&identity(), TokenClass::Refresh, LineageId::new(), Duration::days(1))
            .await
            .unwrap();
        assert_eq!(ours.parse(&forged.token).await, Err(TokenError::Signature));
    }

    #[tokio::test]
    async fn garbage_and_wrong_audience_are_malformed() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ours = codec_with(KEY, "storefront", clock.clone());
        let other_app = codec_with(KEY, "back-office", clock);

        assert_eq!(ours.parse("").await, Err(TokenError::Malformed));
        assert_eq!(ours.parse("not-a-token").await, Err(TokenError::Malformed));
        assert_eq!(ours.parse("a.b.c").await, Err(TokenError::Malformed));

        let token = other_app
            .issue(&identity(), TokenClass::Access, LineageId::new(), Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(ours.parse(&token.token).await, Err(TokenError::Malformed));
    }

    #[tokio::test]
    async fn non_positive_ttl_is_refused() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = codec_with(KEY, "storefront", clock);
        let res = codec
            .issue(&identity(), TokenClass::Access, LineageId::new(), Duration::zero())
            .await;
        assert!(matches!(res, Err(TokenError::Internal(_))));
    }

    #[tokio::test]
    async fn sub_second_ttl_is_usable_right_away() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::milliseconds(300);
        let clock = Arc::new(ManualClock::new(start));
        let codec = codec_with(KEY, "storefront", clock.clone());

        let token = codec
            .issue(&identity(), TokenClass::Access, LineageId::new(), Duration::milliseconds(500))
            .await
            .unwrap();
        assert!(token.claims.expires_at >= start + Duration::milliseconds(500));
        assert!(codec.parse(&token.token).await.is_ok());

        clock.advance(Duration::seconds(2));
        assert_eq!(codec.parse(&token.token).await, Err(TokenError::Expired));
    }

    #[tokio::test]
    async fn ttl_past_the_calendar_is_an_error_not_a_panic() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = codec_with(KEY, "storefront", clock);
        let res = codec
            .issue(
                &identity(),
                TokenClass::Refresh,
                LineageId::new(),
                Duration::seconds(1_000_000_000_000_000),
            )
            .await;
        assert!(matches!(res, Err(TokenError::Internal(_))));
    }

    #[test]
    fn short_keys_are_refused_and_keys_never_print() {
        assert!(SigningKey::new(b"short".to_vec()).is_err());
        let key = SigningKey::new(KEY.to_vec()).unwrap();
        assert_eq!(format!("{:?}", key), "SigningKey(<redacted>)");
    }
}
