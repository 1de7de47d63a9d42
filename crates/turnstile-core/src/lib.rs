//! Turnstile Core - Domain types and configuration
//!
//! This crate defines the abstractions shared by the API server and the CLI:
//! - Account roles and the session namespaces they map to
//! - Configuration management
//!
//! Author: hephaex@gmail.com

pub mod config;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, Environment, LoggingConfig,
    ServerConfig, StorageBackend,
};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============================================================================
// Roles
// ============================================================================

/// Kind of account a token or session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    User,
    Admin,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::User => "user",
            AccountRole::Admin => "admin",
        }
    }

    /// Session namespace that holds this role's login marker
    pub fn namespace(&self) -> SessionNamespace {
        match self {
            AccountRole::User => SessionNamespace::User,
            AccountRole::Admin => SessionNamespace::Admin,
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(AccountRole::User),
            "admin" => Ok(AccountRole::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Returned when a role string does not name a known role
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown account role: {0}")]
pub struct UnknownRole(pub String);

// ============================================================================
// Session namespaces
// ============================================================================

/// Role-scoped key partition for session records
///
/// The same subject id may hold a user session and an admin session at the
/// same time; they never overwrite each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionNamespace {
    #[serde(rename = "user-session")]
    User,
    #[serde(rename = "admin-session")]
    Admin,
}

impl SessionNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionNamespace::User => "user-session",
            SessionNamespace::Admin => "admin-session",
        }
    }
}

impl std::fmt::Display for SessionNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_through_str() {
        assert_eq!("admin".parse::<AccountRole>().unwrap(), AccountRole::Admin);
        assert_eq!(" USER ".parse::<AccountRole>().unwrap(), AccountRole::User);
        assert!("editor".parse::<AccountRole>().is_err());
        assert_eq!(AccountRole::Admin.to_string(), "admin");
    }

    #[test]
    fn test_roles_use_distinct_namespaces() {
        assert_eq!(AccountRole::User.namespace().as_str(), "user-session");
        assert_eq!(AccountRole::Admin.namespace().as_str(), "admin-session");
        assert_ne!(AccountRole::User.namespace(), AccountRole::Admin.namespace());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&AccountRole::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
        let ns = serde_json::to_string(&SessionNamespace::User).unwrap();
        assert_eq!(ns, "\"user-session\"");
    }
}
