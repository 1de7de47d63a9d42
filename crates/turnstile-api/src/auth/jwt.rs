//! JWT token issuance and verification
//!
//! Implements HMAC-SHA256 signed access and refresh tokens sharing one secret.
//! Both carry the same subject and role; the `typ` claim keeps a refresh token
//! from being accepted where an access token is expected and vice versa.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use prometheus::IntCounterVec;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use turnstile_core::{AccountRole, AuthConfig};
use uuid::Uuid;

/// Clock skew tolerated when checking `exp`
const LEEWAY_SECS: u64 = 5;

/// Which of the two token flavours a claim set belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - account ID
    pub sub: String,
    /// Account role the token was issued for
    pub role: AccountRole,
    /// Access or refresh
    pub typ: TokenKind,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

impl Claims {
    /// Parse the subject back into an account id
    pub fn subject_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| JwtError::InvalidToken("subject is not an account id".to_string()))
    }
}

/// Identity a token is minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSubject {
    pub id: Uuid,
    pub role: AccountRole,
}

impl TokenSubject {
    pub fn new(id: Uuid, role: AccountRole) -> Self {
        Self { id, role }
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    ExpiredToken,

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),

    #[error("Token lifetime of {0}s overflows the expiry timestamp")]
    LifetimeOverflow(u64),
}

impl JwtError {
    /// True when the token was genuine but is past its expiry
    pub fn is_expired(&self) -> bool {
        matches!(self, JwtError::ExpiredToken)
    }

    /// Failures on the signing side: key, clock or lifetime misconfiguration
    pub fn is_issuer_fault(&self) -> bool {
        matches!(
            self,
            JwtError::EncodingError(_) | JwtError::SystemTimeError(_) | JwtError::LifetimeOverflow(_)
        )
    }
}

/// JWT Configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for HMAC signing
    pub secret: String,
    /// Access token lifetime in seconds (default: 900 = 15 minutes)
    pub access_expiration_secs: u64,
    /// Refresh token lifetime in seconds (default: 7 days)
    pub refresh_expiration_secs: u64,
    /// Token issuer identifier
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for JwtConfig {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            secret: auth.jwt_secret.clone(),
            access_expiration_secs: auth.access_token_ttl_secs(),
            refresh_expiration_secs: auth.refresh_token_ttl_secs(),
            issuer: auth.issuer.clone(),
        }
    }
}

/// Signs and verifies access and refresh tokens
///
/// Keys are derived once at construction; the issuer is cheap to share
/// behind an `Arc`.
pub struct TokenIssuer {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issued: Option<IntCounterVec>,
}

impl TokenIssuer {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
            issued: None,
        }
    }

    /// Count every issued token in `counter`, labelled by kind
    pub fn with_metrics(mut self, counter: IntCounterVec) -> Self {
        self.issued = Some(counter);
        self
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Issue a short-lived access token
    pub fn issue_access(&self, subject: TokenSubject) -> Result<String, JwtError> {
        self.issue(subject, TokenKind::Access)
    }

    /// Issue a long-lived refresh token
    pub fn issue_refresh(&self, subject: TokenSubject) -> Result<String, JwtError> {
        self.issue(subject, TokenKind::Refresh)
    }

    fn issue(&self, subject: TokenSubject, kind: TokenKind) -> Result<String, JwtError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let lifetime = match kind {
            TokenKind::Access => self.config.access_expiration_secs,
            TokenKind::Refresh => self.config.refresh_expiration_secs,
        };

        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: subject.id.to_string(),
            role: subject.role,
            typ: kind,
            iat: now,
            exp: now
                .checked_add(lifetime)
                .ok_or(JwtError::LifetimeOverflow(lifetime))?,
        };

        self.encode_claims(&claims)
    }

    /// Sign an arbitrary claim set with this issuer's key
    pub fn encode_claims(&self, claims: &Claims) -> Result<String, JwtError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(JwtError::EncodingError)?;

        if let Some(counter) = &self.issued {
            counter.with_label_values(&[claims.typ.as_str()]).inc();
        }

        Ok(token)
    }

    /// Verify signature, issuer, expiry and kind, returning the claims
    ///
    /// # Errors
    ///
    /// * `JwtError::ExpiredToken` - genuine token past its expiry
    /// * `JwtError::InvalidToken` - anything else: bad signature, malformed,
    ///   foreign issuer, or a token of the other kind
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.leeway = LEEWAY_SECS;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
                ErrorKind::InvalidSignature => {
                    JwtError::InvalidToken("invalid signature".to_string())
                }
                ErrorKind::InvalidIssuer => JwtError::InvalidToken("invalid issuer".to_string()),
                _ => JwtError::InvalidToken("malformed token".to_string()),
            }
        })?;

        if token_data.claims.typ != kind {
            return Err(JwtError::InvalidToken(format!(
                "expected {} token",
                kind.as_str()
            )));
        }

        Ok(token_data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenKind::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Opts;

    fn issuer_with_secret(secret: &str) -> TokenIssuer {
        TokenIssuer::new(JwtConfig {
            secret: secret.to_string(),
            ..Default::default()
        })
    }

    fn expired_claims(issuer: &TokenIssuer, kind: TokenKind) -> Claims {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        Claims {
            iss: issuer.config().issuer.clone(),
            sub: Uuid::new_v4().to_string(),
            role: AccountRole::User,
            typ: kind,
            iat: now - 7200, // Issued 2 hours ago
            exp: now - 3600, // Expired 1 hour ago
        }
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let issuer = TokenIssuer::new(JwtConfig::default());
        let subject = TokenSubject::new(Uuid::new_v4(), AccountRole::User);

        let token = issuer.issue_access(subject).expect("Failed to issue token");
        let claims = issuer.verify_access(&token).expect("Failed to verify token");

        assert_eq!(claims.subject_id().unwrap(), subject.id);
        assert_eq!(claims.role, AccountRole::User);
        assert_eq!(claims.typ, TokenKind::Access);
        assert_eq!(claims.iss, "turnstile");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_refresh_token_outlives_access_token() {
        let issuer = TokenIssuer::new(JwtConfig::default());
        let subject = TokenSubject::new(Uuid::new_v4(), AccountRole::Admin);

        let access = issuer.verify_access(&issuer.issue_access(subject).unwrap()).unwrap();
        let refresh = issuer
            .verify_refresh(&issuer.issue_refresh(subject).unwrap())
            .unwrap();

        assert!(refresh.exp > access.exp);
        assert_eq!(refresh.sub, access.sub);
        assert_eq!(refresh.role, AccountRole::Admin);
    }

    #[test]
    fn test_malformed_token() {
        let issuer = TokenIssuer::new(JwtConfig::default());
        let result = issuer.verify_access("invalid.token.here");
        assert!(matches!(result, Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn test_wrong_secret_is_invalid_not_expired() {
        let issuer1 = issuer_with_secret("secret1");
        let issuer2 = issuer_with_secret("secret2");

        let token = issuer1
            .issue_access(TokenSubject::new(Uuid::new_v4(), AccountRole::User))
            .unwrap();

        let result = issuer2.verify_access(&token);
        assert!(matches!(result, Err(JwtError::InvalidToken(msg)) if msg == "invalid signature"));
    }

    #[test]
    fn test_expired_token() {
        let issuer = TokenIssuer::new(JwtConfig::default());
        let token = issuer
            .encode_claims(&expired_claims(&issuer, TokenKind::Access))
            .unwrap();

        let result = issuer.verify_access(&token);
        assert!(matches!(result, Err(JwtError::ExpiredToken)));
        assert!(result.unwrap_err().is_expired());
    }

    #[test]
    fn test_expired_token_with_wrong_secret_is_invalid() {
        let issuer = issuer_with_secret("secret1");
        let token = issuer
            .encode_claims(&expired_claims(&issuer, TokenKind::Access))
            .unwrap();

        let result = issuer_with_secret("secret2").verify_access(&token);
        assert!(matches!(result, Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let issuer = TokenIssuer::new(JwtConfig::default());
        let subject = TokenSubject::new(Uuid::new_v4(), AccountRole::User);

        let refresh = issuer.issue_refresh(subject).unwrap();
        assert!(matches!(
            issuer.verify_access(&refresh),
            Err(JwtError::InvalidToken(_))
        ));

        let access = issuer.issue_access(subject).unwrap();
        assert!(matches!(
            issuer.verify_refresh(&access),
            Err(JwtError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let ours = TokenIssuer::new(JwtConfig::default());
        let theirs = TokenIssuer::new(JwtConfig {
            issuer: "someone-else".to_string(),
            ..Default::default()
        });

        let token = theirs
            .issue_access(TokenSubject::new(Uuid::new_v4(), AccountRole::User))
            .unwrap();
        assert!(matches!(
            ours.verify_access(&token),
            Err(JwtError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_issued_tokens_are_counted_by_kind() {
        let counter = IntCounterVec::new(Opts::new("issued", "issued tokens"), &["kind"]).unwrap();
        let issuer = TokenIssuer::new(JwtConfig::default()).with_metrics(counter.clone());
        let subject = TokenSubject::new(Uuid::new_v4(), AccountRole::User);

        issuer.issue_access(subject).unwrap();
        issuer.issue_access(subject).unwrap();
        issuer.issue_refresh(subject).unwrap();

        assert_eq!(counter.with_label_values(&["access"]).get(), 2);
        assert_eq!(counter.with_label_values(&["refresh"]).get(), 1);
    }

    #[test]
    fn test_unrepresentable_expiry_is_an_issuer_fault() {
        let issuer = TokenIssuer::new(JwtConfig {
            refresh_expiration_secs: u64::MAX,
            ..Default::default()
        });
        let subject = TokenSubject::new(Uuid::new_v4(), AccountRole::User);

        let err = issuer.issue_refresh(subject).unwrap_err();
        assert!(matches!(err, JwtError::LifetimeOverflow(u64::MAX)));
        assert!(err.is_issuer_fault());
        assert!(issuer.issue_access(subject).is_ok());
        assert!(!JwtError::ExpiredToken.is_issuer_fault());
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let claims = Claims {
            iss: "turnstile".to_string(),
            sub: "not-a-uuid".to_string(),
            role: AccountRole::User,
            typ: TokenKind::Access,
            iat: 0,
            exp: 0,
        };
        assert!(matches!(claims.subject_id(), Err(JwtError::InvalidToken(_))));
    }
}
