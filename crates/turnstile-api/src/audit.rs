//! Security audit logging for account and session events
//!
//! Every event is emitted at INFO level on the `audit` target with the full
//! event serialized as JSON, so audit records can be routed away from the
//! application log with an `EnvFilter` directive such as `audit=info`.
//!
//! # Example
//!
//! ```ignore
//! use turnstile_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::Logout {
//!     subject_id: identity.subject_id,
//!     role: identity.role,
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use turnstile_core::AccountRole;
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Account created through signup
    Registration {
        subject_id: Uuid,
        email: String,
        ip_address: Option<String>,
    },

    LoginSuccess {
        subject_id: Uuid,
        role: AccountRole,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    LoginFailure {
        email: String,
        role: AccountRole,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    Logout {
        subject_id: Uuid,
        role: AccountRole,
    },

    /// Password overwritten through the forgot-password flow
    PasswordReset {
        email: String,
        ip_address: Option<String>,
    },

    /// Account removed, by its owner or by an admin
    AccountDeleted {
        subject_id: Uuid,
        deleted_by: Uuid,
        deleted_by_role: AccountRole,
    },

    /// Access token minted from a refresh token
    TokenRefresh {
        subject_id: Uuid,
        role: AccountRole,
        ip_address: Option<String>,
    },

    /// Authenticated caller lacks the required role
    AccessDenied {
        subject_id: Uuid,
        role: AccountRole,
        required_role: AccountRole,
        namespace: String,
        ip_address: Option<String>,
    },

    /// Bearer token failed verification
    InvalidToken {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
}

impl AuditEvent {
    /// Short message logged alongside the JSON payload
    fn message(&self) -> &'static str {
        match self {
            AuditEvent::Registration { .. } => "Registration successful",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::Logout { .. } => "Logout",
            AuditEvent::PasswordReset { .. } => "Password reset",
            AuditEvent::AccountDeleted { .. } => "Account deleted",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
        }
    }
}

/// Log a security audit event
///
/// Example output with JSON logging enabled:
///
/// ```json
/// {
///   "target": "audit",
///   "event": "{\"event_type\":\"login_success\",\"subject_id\":\"550e...\",\"role\":\"user\",...}",
///   "message": "Login successful"
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::LoginFailure { email, reason, .. } => {
            info!(
                target: "audit",
                event = %event_json,
                email = %email,
                reason = %reason,
                "{}",
                event.message()
            );
        }
        AuditEvent::InvalidToken {
            reason, ip_address, ..
        } => {
            info!(
                target: "audit",
                event = %event_json,
                reason = %reason,
                ip_address = ?ip_address,
                "{}",
                event.message()
            );
        }
        _ => {
            info!(target: "audit", event = %event_json, "{}", event.message());
        }
    }
}

/// Request metadata attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Client IP from `X-Forwarded-For` (first hop) or `X-Real-IP`
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
    {
        return Some(first_ip.trim().to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            subject_id: Uuid::new_v4(),
            role: AccountRole::Admin,
            email: "admin@example.com".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "login_success");
        assert_eq!(json["role"], "admin");
        assert_eq!(json["email"], "admin@example.com");
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginFailure {
            email: "test@example.com".to_string(),
            role: AccountRole::User,
            reason: "Wrong password.".to_string(),
            ip_address: None,
            user_agent: Some("Test Agent".to_string()),
        });
        audit_log(&AuditEvent::Logout {
            subject_id: Uuid::new_v4(),
            role: AccountRole::User,
        });
        audit_log(&AuditEvent::InvalidToken {
            reason: "invalid signature".to_string(),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_client_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.1.2.3".parse().unwrap());
        headers.insert(axum::http::header::USER_AGENT, "curl/8".parse().unwrap());

        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.ip_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(client.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
