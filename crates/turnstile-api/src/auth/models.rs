//! Account records and request/response bodies
//!
//! - `UserRecord` / `AdminRecord`: persisted accounts (password hash included)
//! - `UserProfile` / `AdminProfile`: what the API returns about an account
//! - `SessionLogEntry`: one login in the durable session history
//! - request bodies with `validator` rules applied before the service runs

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use turnstile_core::AccountRole;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    /// Optional country code, then ten digits
    static ref PHONE_NUMBER: Regex =
        Regex::new(r"^(\+?\d{1,3}[- ]?)?\d{10}$").expect("phone pattern compiles");
}

/// Trimmed, lower-cased email used as the identity key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Persisted records
// ============================================================================

/// User account as stored
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin account as stored
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AdminRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new user; the email must already be normalized
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub phone_number: Option<String>,
}

/// Fields for a new admin; the email must already be normalized
#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
}

/// One login in the session history
///
/// Written alongside the live session record; closed when the session is
/// replaced by a newer login or ended by logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogEntry {
    pub session_id: Uuid,
    pub subject_id: Uuid,
    pub role: AccountRole,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Profile fields a user may change; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone_number: Option<String>,
}

// ============================================================================
// Public views
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            name: record.name,
            phone_number: record.phone_number,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminProfile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AdminRecord> for AdminProfile {
    fn from(record: AdminRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            name: record.name,
            created_at: record.created_at,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(UserPage = Page<UserProfile>)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_count: u64,
    pub current_page: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total_count: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total_count.div_ceil(u64::from(limit)) as u32
        };
        Self {
            data,
            total_count,
            current_page: page,
            total_pages,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SignupRequest {
    #[validate(email(message = "Email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 25, message = "Password must be 8-25 characters"))]
    pub password: String,
    /// Must equal `password` when present
    pub confirm_password: Option<String>,
    #[validate(length(min = 3, max = 25, message = "Name must be 3-25 characters"))]
    pub name: Option<String>,
    #[validate(regex(path = *PHONE_NUMBER, message = "Phone number is invalid"))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 25, message = "Password must be 8-25 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 3, max = 25, message = "Name must be 3-25 characters"))]
    pub name: Option<String>,
    #[validate(regex(path = *PHONE_NUMBER, message = "Phone number is invalid"))]
    pub phone_number: Option<String>,
}

impl From<UpdateUserRequest> for ProfileUpdate {
    fn from(req: UpdateUserRequest) -> Self {
        Self {
            name: req.name,
            phone_number: req.phone_number,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct DeleteUserRequest {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
}

/// `?userId=` for one user's session history
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionHistoryQuery {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
}

/// `?limit=&page=` for listings
#[derive(Debug, Clone, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationQuery {
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<u32>,
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<u32>,
}

impl PaginationQuery {
    pub const DEFAULT_LIMIT: u32 = 10;

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page().saturating_sub(1)) * u64::from(self.limit())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Signup and login result
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserAuthResponse {
    pub user: UserProfile,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminAuthResponse {
    pub admin: AdminProfile,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}
