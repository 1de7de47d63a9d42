//! Session-checking authentication gate
//!
//! One middleware serves both user and admin routes; a [`GatePolicy`] selects
//! the session namespace and the role the token must carry.
//!
//! Per request:
//! 1. No `Authorization` header: [`AuthError::MissingAuthHeader`]
//! 2. Header without a usable bearer value: [`AuthError::MissingToken`]
//! 3. Token fails verification (bad signature, expired, wrong kind): [`AuthError::InvalidToken`]
//! 4. No session record for the subject in the policy's namespace: [`AuthError::SessionNotFound`]
//! 5. Token role differs from the policy's required role: [`AuthError::Forbidden`]
//!
//! On success an [`Identity`] is inserted into the request extensions.

use super::jwt::{JwtError, TokenIssuer};
use super::session::{SessionError, SessionStore};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use turnstile_core::{AccountRole, SessionNamespace};
use uuid::Uuid;

/// Where a gate looks for sessions and which role it demands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub namespace: SessionNamespace,
    pub required_role: Option<AccountRole>,
}

impl GatePolicy {
    /// Any authenticated account with a user session
    pub const USER: GatePolicy = GatePolicy {
        namespace: SessionNamespace::User,
        required_role: None,
    };

    /// Admin tokens with an admin session only
    pub const ADMIN: GatePolicy = GatePolicy {
        namespace: SessionNamespace::Admin,
        required_role: Some(AccountRole::Admin),
    };
}

/// Identity resolved by the gate
///
/// Extract in handlers with `Extension<Identity>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject_id: Uuid,
    pub role: AccountRole,
    pub session_id: Uuid,
}

/// Authentication gate errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header is missing.")]
    MissingAuthHeader,

    #[error("Token is missing")]
    MissingToken,

    #[error("{0}")]
    InvalidToken(#[from] JwtError),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Admin access routes only")]
    Forbidden,

    #[error("Session store unavailable")]
    Backend(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader | AuthError::MissingToken => StatusCode::NOT_FOUND,
            AuthError::InvalidToken(_) | AuthError::SessionNotFound => StatusCode::BAD_REQUEST,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => AuthError::SessionNotFound,
            other => AuthError::Backend(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Backend(detail) = &self {
            warn!(error = %detail, "Session lookup failed");
        }
        ApiError::new(self.status(), self.to_string()).into_response()
    }
}

/// Gate state: policy plus the verifier and the session store it reads
#[derive(Clone)]
pub struct AuthGate {
    policy: GatePolicy,
    tokens: Arc<TokenIssuer>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthGate {
    pub fn new(policy: GatePolicy, tokens: Arc<TokenIssuer>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            policy,
            tokens,
            sessions,
        }
    }

    /// Run the gate's checks against a set of request headers
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;

        let claims = self.tokens.verify_access(token).map_err(|e| {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.to_string(),
                ip_address: extract_ip_address(headers),
                user_agent: extract_user_agent(headers),
            });
            AuthError::InvalidToken(e)
        })?;
        let subject_id = claims.subject_id()?;

        let record = self.sessions.get(subject_id, self.policy.namespace).await?;

        if let Some(required) = self.policy.required_role {
            if claims.role != required {
                audit_log(&AuditEvent::AccessDenied {
                    subject_id,
                    role: claims.role,
                    required_role: required,
                    namespace: self.policy.namespace.to_string(),
                    ip_address: extract_ip_address(headers),
                });
                return Err(AuthError::Forbidden);
            }
        }

        Ok(Identity {
            subject_id,
            role: claims.role,
            session_id: record.session_id,
        })
    }
}

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::MissingToken)?;

    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::MissingToken)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Authentication middleware
///
/// # Usage
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use turnstile_api::auth::gate::{require_session, AuthGate, GatePolicy};
///
/// let gate = AuthGate::new(GatePolicy::ADMIN, tokens, sessions);
/// let app = Router::new()
///     .route("/all_users", get(list_users))
///     .route_layer(middleware::from_fn_with_state(gate, require_session));
/// ```
pub async fn require_session(
    State(gate): State<AuthGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = gate.authenticate(request.headers()).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
