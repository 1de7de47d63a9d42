//! Silent access-token refresh
//!
//! [`silent_refresh`] sits in front of the auth gate on user routes. When the
//! request's bearer token is unusable but the `rToken` cookie carries a valid
//! refresh token for an account that still exists, it mints a new access
//! token, rewrites the request's `Authorization` header and returns the new
//! token to the client in the `token` response header.
//!
//! The middleware never rejects a request: every refresh failure falls
//! through to the gate, which produces the real error.

use super::jwt::{Claims, JwtError, TokenIssuer, TokenSubject};
use super::repository::{AdminRepository, RepositoryError, UserRepository};
use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use moka::future::Cache;
use prometheus::IntCounterVec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use turnstile_core::AccountRole;
use uuid::Uuid;

/// Response header carrying a freshly minted access token
pub const REFRESHED_TOKEN_HEADER: &str = "token";

// ============================================================================
// Cache
// ============================================================================

/// Recently minted access tokens, keyed by subject and role
///
/// Entries live for less than an access token does, so a cached token is
/// always still valid when served. The session manager invalidates an entry
/// whenever that subject logs in or out.
#[derive(Clone)]
pub struct AccessTokenCache {
    inner: Cache<(Uuid, AccountRole), String>,
}

impl AccessTokenCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    /// Cache sized for an access token lifetime: entries expire at half of it
    pub fn for_access_lifetime(access_ttl_secs: u64) -> Self {
        Self::new(cache_ttl(access_ttl_secs), 10_000)
    }

    pub async fn get(&self, subject_id: Uuid, role: AccountRole) -> Option<String> {
        self.inner.get(&(subject_id, role)).await
    }

    pub async fn insert(&self, subject_id: Uuid, role: AccountRole, token: String) {
        self.inner.insert((subject_id, role), token).await;
    }

    pub async fn invalidate(&self, subject_id: Uuid, role: AccountRole) {
        self.inner.invalidate(&(subject_id, role)).await;
    }
}

fn cache_ttl(access_ttl_secs: u64) -> Duration {
    Duration::from_secs((access_ttl_secs / 2).max(1))
}

// ============================================================================
// Exchange
// ============================================================================

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Refresh token is missing")]
    MissingCookie,

    #[error("{0}")]
    Token(#[from] JwtError),

    #[error("User does not exist with this ID.")]
    UnknownAccount,

    #[error("Account lookup failed: {0}")]
    Repository(#[from] RepositoryError),
}

/// A new access token for a refresh token's subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    pub subject_id: Uuid,
    pub role: AccountRole,
    pub token: String,
    /// Served from the cache rather than freshly signed
    pub cached: bool,
}

/// Exchanges refresh tokens for access tokens
#[derive(Clone)]
pub struct RefreshGate {
    tokens: Arc<TokenIssuer>,
    users: Arc<dyn UserRepository>,
    admins: Arc<dyn AdminRepository>,
    cookie_name: String,
    cache: Option<AccessTokenCache>,
    outcomes: Option<IntCounterVec>,
}

impl RefreshGate {
    pub fn new(
        tokens: Arc<TokenIssuer>,
        users: Arc<dyn UserRepository>,
        admins: Arc<dyn AdminRepository>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            users,
            admins,
            cookie_name: cookie_name.into(),
            cache: None,
            outcomes: None,
        }
    }

    pub fn with_cache(mut self, cache: AccessTokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Count middleware outcomes in `counter`, labelled by outcome
    pub fn with_metrics(mut self, counter: IntCounterVec) -> Self {
        self.outcomes = Some(counter);
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Refresh token from the request's cookie, if any
    pub fn refresh_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        cookie_value(headers, &self.cookie_name)
    }

    /// Verify a refresh token and mint an access token for its subject
    pub async fn exchange(&self, refresh_token: &str) -> Result<MintedToken, RefreshError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        let subject_id = claims.subject_id()?;
        let role = claims.role;

        if !self.account_exists(&claims, subject_id).await? {
            return Err(RefreshError::UnknownAccount);
        }

        if let Some(cache) = &self.cache {
            if let Some(token) = cache.get(subject_id, role).await {
                return Ok(MintedToken {
                    subject_id,
                    role,
                    token,
                    cached: true,
                });
            }
        }

        let token = self
            .tokens
            .issue_access(TokenSubject::new(subject_id, role))?;
        if let Some(cache) = &self.cache {
            cache.insert(subject_id, role, token.clone()).await;
        }

        Ok(MintedToken {
            subject_id,
            role,
            token,
            cached: false,
        })
    }

    async fn account_exists(&self, claims: &Claims, subject_id: Uuid) -> Result<bool, RepositoryError> {
        Ok(match claims.role {
            AccountRole::User => self.users.find_by_id(subject_id).await?.is_some(),
            AccountRole::Admin => self.admins.find_by_id(subject_id).await?.is_some(),
        })
    }

    fn count(&self, outcome: &str) {
        if let Some(counter) = &self.outcomes {
            counter.with_label_values(&[outcome]).inc();
        }
    }

    /// Whether the current bearer token still verifies
    fn bearer_is_usable(&self, headers: &HeaderMap) -> Option<bool> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value
            .trim()
            .split_once(' ')
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())?;
        Some(self.tokens.verify_access(token).is_ok())
    }
}

/// Silent refresh middleware
///
/// # Usage
///
/// ```ignore
/// let user_routes = Router::new()
///     .route("/info", get(info))
///     .layer(middleware::from_fn_with_state(refresh_gate, silent_refresh));
/// ```
pub async fn silent_refresh(
    State(gate): State<RefreshGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let minted = match gate.bearer_is_usable(request.headers()) {
        // No bearer token at all; the auth gate reports it
        None => {
            gate.count("no_token");
            None
        }
        Some(true) => {
            gate.count("valid");
            None
        }
        Some(false) => match gate.refresh_token(request.headers()) {
            None => {
                gate.count("no_cookie");
                None
            }
            Some(refresh_token) => match gate.exchange(refresh_token).await {
                Ok(minted) => Some(minted),
                Err(e) => {
                    debug!(error = %e, "Silent refresh skipped");
                    gate.count("failed");
                    None
                }
            },
        },
    };

    let Some(minted) = minted else {
        return next.run(request).await;
    };

    let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", minted.token)) else {
        gate.count("failed");
        return next.run(request).await;
    };
    request.headers_mut().insert(header::AUTHORIZATION, bearer);

    gate.count(if minted.cached { "cached" } else { "refreshed" });
    audit_log(&AuditEvent::TokenRefresh {
        subject_id: minted.subject_id,
        role: minted.role,
        ip_address: extract_ip_address(request.headers()),
    });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&minted.token) {
        response.headers_mut().insert(REFRESHED_TOKEN_HEADER, value);
    }
    response
}

// ============================================================================
// Cookies
// ============================================================================

/// Value of the named cookie in the request's `Cookie` headers
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying a refresh token
pub fn refresh_cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    format!("{name}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value that removes the refresh cookie
pub fn clear_refresh_cookie(name: &str) -> String {
    refresh_cookie(name, "", 0)
}
