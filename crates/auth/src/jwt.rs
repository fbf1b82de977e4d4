//! Bearer credential validation.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};
use crate::{Principal, PrincipalId, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("bad signature")]
    BadSignature,

    #[error("wrong issuer or audience")]
    WrongAudience,

    #[error(transparent)]
    Lifetime(#[from] TokenValidationError),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Resolves a bearer credential into a principal.
///
/// Implementations must be pure with respect to `now` so callers can test
/// expiry deterministically.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, CredentialError>;
}

/// HMAC key and the issuer/audience every token must carry.
#[derive(Clone)]
pub struct JwtSettings {
    pub secret: Vec<u8>,
    pub issuer: String,
    pub audience: String,
    pub lifetime: Duration,
}

impl JwtSettings {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "bazaar".to_string(),
            audience: "bazaar-clients".to_string(),
            lifetime: Duration::hours(1),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

impl core::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// HS256 validator (and issuer) for shop tokens.
pub struct HmacJwtValidator {
    settings: JwtSettings,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl HmacJwtValidator {
    pub fn new(settings: JwtSettings) -> Self {
        let encoding = EncodingKey::from_secret(&settings.secret);
        let decoding = DecodingKey::from_secret(&settings.secret);
        Self {
            settings,
            encoding,
            decoding,
        }
    }

    pub fn settings(&self) -> &JwtSettings {
        &self.settings
    }

    /// Mint a token for `subject`, valid from `now` for the configured lifetime.
    pub fn issue(
        &self,
        subject: impl Into<String>,
        email: Option<String>,
        roles: Vec<Role>,
        now: DateTime<Utc>,
    ) -> Result<String, CredentialError> {
        let claims = JwtClaims {
            sub: PrincipalId::new(subject),
            email,
            roles,
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now,
            exp: now + self.settings.lifetime,
            jti: Uuid::now_v7().to_string(),
        };
        self.encode(&claims)
    }

    /// Re-issue a still-valid token with a fresh `jti` and expiry.
    pub fn refresh(&self, token: &str, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let mut claims = self.decode(token)?;
        validate_claims(&claims, now)?;
        claims.iat = now;
        claims.exp = now + self.settings.lifetime;
        claims.jti = Uuid::now_v7().to_string();
        self.encode(&claims)
    }

    fn encode(&self, claims: &JwtClaims) -> Result<String, CredentialError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| CredentialError::Encoding(e.to_string()))
    }

    fn decode(&self, token: &str) -> Result<JwtClaims, CredentialError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        validation.set_audience(&[self.settings.audience.as_str()]);
        validation.leeway = 0;
        // Lifetime is checked against the caller's clock in `validate_claims`.
        validation.validate_exp = false;

        jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind as JwtKind;
                match e.kind() {
                    JwtKind::InvalidSignature => CredentialError::BadSignature,
                    JwtKind::InvalidIssuer | JwtKind::InvalidAudience => {
                        CredentialError::WrongAudience
                    }
                    _ => CredentialError::Malformed(e.to_string()),
                }
            })
    }
}

impl CredentialValidator for HmacJwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, CredentialError> {
        let claims = self.decode(token).inspect_err(|e| debug!(error = %e, "token rejected"))?;
        validate_claims(&claims, now)
            .inspect_err(|e| debug!(subject = %claims.sub, error = %e, "token outside its lifetime"))?;
        Ok(claims.into_principal())
    }
}
