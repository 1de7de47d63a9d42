//! Account service layer
//!
//! Business logic for user and admin accounts: signup, login, logout,
//! password reset, profile changes and deletion. Services own no storage;
//! they combine the repositories, the password hasher, the token issuer and
//! the session manager.
//!
//! Failures that are the caller's fault (`DuplicateEmail`, `NotFound`,
//! `WrongPassword`, `PasswordMismatch`) are reported verbatim to the client;
//! everything else is an internal error.

use super::jwt::{JwtError, TokenIssuer, TokenSubject};
use super::manager::SessionManager;
use super::models::{
    normalize_email, AdminProfile, ForgotPasswordRequest, LoginRequest, NewAdmin, NewUser, Page,
    PaginationQuery, ProfileUpdate, SessionLogEntry, SignupRequest, UserAuthResponse, UserProfile,
};
use super::password::{PasswordError, PasswordHasher};
use super::repository::{AdminRepository, RepositoryError, UserRepository};
use super::session::{SessionError, SessionRecord};
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use prometheus::IntCounterVec;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use turnstile_core::AccountRole;
use uuid::Uuid;

/// Account operation errors
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Email is already registered.")]
    DuplicateEmail,

    #[error("Password did not match")]
    PasswordMismatch,

    #[error("User not found.")]
    NotFound,

    #[error("Wrong password.")]
    WrongPassword,

    #[error("Token error: {0}")]
    Token(#[from] JwtError),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AccountError {
    /// Whether the failure was caused by the request rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AccountError::DuplicateEmail
                | AccountError::PasswordMismatch
                | AccountError::NotFound
                | AccountError::WrongPassword
        )
    }
}

impl From<RepositoryError> for AccountError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::DuplicateEmail => AccountError::DuplicateEmail,
            RepositoryError::Database(msg) => AccountError::Storage(msg),
        }
    }
}

/// Successful login: the account, both tokens and the new session
#[derive(Debug, Clone)]
pub struct LoginOutcome<T> {
    pub account: T,
    pub access_token: String,
    pub refresh_token: String,
    pub session: SessionRecord,
}

/// Result of seeding the bootstrap admin
#[derive(Debug, Clone)]
pub enum SeedOutcome {
    Created(AdminProfile),
    AlreadyPresent,
}

/// Shared login bookkeeping for both account kinds
#[derive(Clone, Default)]
struct LoginMetrics(Option<IntCounterVec>);

impl LoginMetrics {
    fn record(&self, role: AccountRole, outcome: &str) {
        if let Some(counter) = &self.0 {
            counter.with_label_values(&[role.as_str(), outcome]).inc();
        }
    }

    fn failed(
        &self,
        role: AccountRole,
        email: &str,
        error: AccountError,
        client: &ClientInfo,
    ) -> AccountError {
        let outcome = match error {
            AccountError::NotFound => "not_found",
            AccountError::WrongPassword => "wrong_password",
            _ => "error",
        };
        self.record(role, outcome);
        audit_log(&AuditEvent::LoginFailure {
            email: email.to_string(),
            role,
            reason: error.to_string(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });
        error
    }

    fn succeeded(&self, role: AccountRole, subject_id: Uuid, email: &str, client: &ClientInfo) {
        self.record(role, "success");
        audit_log(&AuditEvent::LoginSuccess {
            subject_id,
            role,
            email: email.to_string(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });
    }
}

/// Issue both tokens, then replace the session
///
/// Tokens are signed first so a signing failure never leaves a session behind.
async fn start_session(
    tokens: &TokenIssuer,
    sessions: &SessionManager,
    subject: TokenSubject,
) -> Result<(String, String, SessionRecord), AccountError> {
    let access_token = tokens.issue_access(subject)?;
    let refresh_token = tokens.issue_refresh(subject)?;
    let session = sessions.login(subject.id, subject.role).await?;
    Ok((access_token, refresh_token, session))
}

// ============================================================================
// Users
// ============================================================================

pub struct UserService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenIssuer>,
    hasher: PasswordHasher,
    logins: LoginMetrics,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenIssuer>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            hasher,
            logins: LoginMetrics::default(),
        }
    }

    /// Count login attempts in `counter`, labelled by role and outcome
    pub fn with_metrics(mut self, counter: IntCounterVec) -> Self {
        self.logins = LoginMetrics(Some(counter));
        self
    }

    /// Register a user, log them in and return an access token
    pub async fn signup(
        &self,
        request: SignupRequest,
        client: &ClientInfo,
    ) -> Result<UserAuthResponse, AccountError> {
        if let Some(confirm) = &request.confirm_password {
            if confirm != &request.password {
                return Err(AccountError::PasswordMismatch);
            }
        }

        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AccountError::DuplicateEmail);
        }

        let password_hash = self.hasher.hash_async(&request.password).await?;
        let user = self
            .users
            .create(NewUser {
                email,
                password_hash,
                name: request.name,
                phone_number: request.phone_number,
            })
            .await?;

        let subject = TokenSubject::new(user.id, AccountRole::User);
        let token = self.tokens.issue_access(subject)?;
        self.sessions.login(user.id, AccountRole::User).await?;

        audit_log(&AuditEvent::Registration {
            subject_id: user.id,
            email: user.email.clone(),
            ip_address: client.ip_address.clone(),
        });
        info!(user_id = %user.id, "User registered");

        Ok(UserAuthResponse {
            user: user.into(),
            token,
        })
    }

    /// Verify credentials and start a fresh user session
    ///
    /// Nothing is written and no token is signed unless the password matches.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome<UserProfile>, AccountError> {
        let role = AccountRole::User;
        let email = normalize_email(&request.email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            return Err(self.logins.failed(role, &email, AccountError::NotFound, client));
        };
        if !self
            .hasher
            .verify_async(&request.password, &user.password_hash)
            .await?
        {
            return Err(self.logins.failed(role, &email, AccountError::WrongPassword, client));
        }

        let (access_token, refresh_token, session) =
            start_session(&self.tokens, &self.sessions, TokenSubject::new(user.id, role)).await?;
        self.logins.succeeded(role, user.id, &user.email, client);

        Ok(LoginOutcome {
            account: user.into(),
            access_token,
            refresh_token,
            session,
        })
    }

    /// End the user session; succeeds whether or not one existed
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AccountError> {
        self.sessions.logout(user_id, AccountRole::User).await?;
        audit_log(&AuditEvent::Logout {
            subject_id: user_id,
            role: AccountRole::User,
        });
        Ok(())
    }

    /// Overwrite a user's password given only their email
    ///
    /// There is no possession proof here: no emailed reset token and no
    /// check of the old password. Anyone who knows an address can reset it.
    // TODO: require a single-use reset token delivered out of band before overwriting
    pub async fn forgot_password(
        &self,
        request: ForgotPasswordRequest,
        client: &ClientInfo,
    ) -> Result<(), AccountError> {
        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email).await?.is_none() {
            return Err(AccountError::NotFound);
        }

        let password_hash = self.hasher.hash_async(&request.password).await?;
        if !self
            .users
            .update_password_by_email(&email, &password_hash)
            .await?
        {
            return Err(AccountError::NotFound);
        }

        warn!(email = %email, "Password reset without possession proof");
        audit_log(&AuditEvent::PasswordReset {
            email,
            ip_address: client.ip_address.clone(),
        });
        Ok(())
    }

    pub async fn info(&self, user_id: Uuid) -> Result<UserProfile, AccountError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(UserProfile::from)
            .ok_or(AccountError::NotFound)
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserProfile, AccountError> {
        self.users
            .update_profile(user_id, &update)
            .await?
            .map(UserProfile::from)
            .ok_or(AccountError::NotFound)
    }

    /// Remove a user and end their session
    pub async fn delete(
        &self,
        user_id: Uuid,
        deleted_by: Uuid,
        deleted_by_role: AccountRole,
    ) -> Result<(), AccountError> {
        if !self.users.delete_by_id(user_id).await? {
            return Err(AccountError::NotFound);
        }
        self.sessions.logout(user_id, AccountRole::User).await?;

        audit_log(&AuditEvent::AccountDeleted {
            subject_id: user_id,
            deleted_by,
            deleted_by_role,
        });
        Ok(())
    }

    pub async fn list(&self, query: &PaginationQuery) -> Result<Page<UserProfile>, AccountError> {
        let (limit, page) = (query.limit(), query.page());
        let (records, total) = self.users.list(limit, query.offset()).await?;
        let data = records.into_iter().map(UserProfile::from).collect();
        Ok(Page::new(data, total, page, limit))
    }
}

// ============================================================================
// Admins
// ============================================================================

pub struct AdminService {
    admins: Arc<dyn AdminRepository>,
    users: Arc<UserService>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenIssuer>,
    hasher: PasswordHasher,
    logins: LoginMetrics,
}

impl AdminService {
    pub fn new(
        admins: Arc<dyn AdminRepository>,
        users: Arc<UserService>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenIssuer>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            admins,
            users,
            sessions,
            tokens,
            hasher,
            logins: LoginMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, counter: IntCounterVec) -> Self {
        self.logins = LoginMetrics(Some(counter));
        self
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome<AdminProfile>, AccountError> {
        let role = AccountRole::Admin;
        let email = normalize_email(&request.email);

        let Some(admin) = self.admins.find_by_email(&email).await? else {
            return Err(self.logins.failed(role, &email, AccountError::NotFound, client));
        };
        if !self
            .hasher
            .verify_async(&request.password, &admin.password_hash)
            .await?
        {
            return Err(self.logins.failed(role, &email, AccountError::WrongPassword, client));
        }

        let (access_token, refresh_token, session) =
            start_session(&self.tokens, &self.sessions, TokenSubject::new(admin.id, role)).await?;
        self.logins.succeeded(role, admin.id, &admin.email, client);

        Ok(LoginOutcome {
            account: admin.into(),
            access_token,
            refresh_token,
            session,
        })
    }

    pub async fn logout(&self, admin_id: Uuid) -> Result<(), AccountError> {
        self.sessions.logout(admin_id, AccountRole::Admin).await?;
        audit_log(&AuditEvent::Logout {
            subject_id: admin_id,
            role: AccountRole::Admin,
        });
        Ok(())
    }

    pub async fn list_users(&self, query: &PaginationQuery) -> Result<Page<UserProfile>, AccountError> {
        self.users.list(query).await
    }

    pub async fn delete_user(&self, user_id: Uuid, admin_id: Uuid) -> Result<(), AccountError> {
        self.users.delete(user_id, admin_id, AccountRole::Admin).await
    }

    /// Recorded user-session logins for `user_id`, newest first
    pub async fn user_sessions(&self, user_id: Uuid) -> Result<Vec<SessionLogEntry>, AccountError> {
        Ok(self.sessions.history(user_id, AccountRole::User).await?)
    }

    /// Create the bootstrap admin unless an admin with this email exists
    pub async fn seed(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
    ) -> Result<SeedOutcome, AccountError> {
        let email = normalize_email(email);
        if self.admins.find_by_email(&email).await?.is_some() {
            return Ok(SeedOutcome::AlreadyPresent);
        }

        let password_hash = self.hasher.hash_async(password).await?;
        let created = self
            .admins
            .create(NewAdmin {
                email,
                password_hash,
                name,
            })
            .await;

        match created {
            Ok(admin) => {
                info!(admin_id = %admin.id, email = %admin.email, "Admin account seeded");
                Ok(SeedOutcome::Created(admin.into()))
            }
            // Another instance seeded it first
            Err(RepositoryError::DuplicateEmail) => Ok(SeedOutcome::AlreadyPresent),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{JwtConfig, TokenKind};
    use crate::auth::password::PasswordConfig;
    use crate::auth::repository::InMemoryAccountStore;
    use crate::auth::session::{InMemorySessionStore, SessionStore};
    use prometheus::Opts;
    use turnstile_core::SessionNamespace;

    struct Fixture {
        users: Arc<UserService>,
        admins: AdminService,
        tokens: Arc<TokenIssuer>,
        store: Arc<InMemorySessionStore>,
        issued: IntCounterVec,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let store = Arc::new(InMemorySessionStore::new());
        let sessions = Arc::new(SessionManager::new(store.clone()));
        let issued = IntCounterVec::new(Opts::new("issued", "issued"), &["kind"]).unwrap();
        let tokens =
            Arc::new(TokenIssuer::new(JwtConfig::default()).with_metrics(issued.clone()));
        let hasher = PasswordHasher::new(PasswordConfig::fast_insecure());

        let users = Arc::new(UserService::new(
            accounts.clone(),
            sessions.clone(),
            tokens.clone(),
            hasher.clone(),
        ));
        let admins = AdminService::new(accounts, users.clone(), sessions, tokens.clone(), hasher);

        Fixture {
            users,
            admins,
            tokens,
            store,
            issued,
        }
    }

    fn signup(email: &str, password: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: None,
            name: None,
            phone_number: None,
        }
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn issued_total(fx: &Fixture) -> u64 {
        fx.issued.with_label_values(&["access"]).get()
            + fx.issued.with_label_values(&["refresh"]).get()
    }

    #[tokio::test]
    async fn test_signup_twice_is_duplicate() {
        let fx = fixture();
        let client = ClientInfo::default();

        fx.users.signup(signup("a@b.com", "pw123456"), &client).await.unwrap();
        let second = fx.users.signup(signup("a@b.com", "pw123456"), &client).await;
        assert!(matches!(second, Err(AccountError::DuplicateEmail)));

        // Case and whitespace do not make a new identity
        let third = fx.users.signup(signup(" A@B.com", "pw123456"), &client).await;
        assert!(matches!(third, Err(AccountError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_signup_creates_session_and_token() {
        let fx = fixture();
        let response = fx
            .users
            .signup(signup("a@b.com", "pw123456"), &ClientInfo::default())
            .await
            .unwrap();

        let claims = fx.tokens.verify_access(&response.token).unwrap();
        assert_eq!(claims.subject_id().unwrap(), response.user.id);
        assert!(fx
            .store
            .get(response.user.id, SessionNamespace::User)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_signup_confirmation_mismatch() {
        let fx = fixture();
        let mut request = signup("a@b.com", "pw123456");
        request.confirm_password = Some("pw654321".to_string());

        let result = fx.users.signup(request, &ClientInfo::default()).await;
        assert!(matches!(result, Err(AccountError::PasswordMismatch)));
        assert_eq!(result.unwrap_err().to_string(), "Password did not match");
    }

    #[tokio::test]
    async fn test_login_then_verify_matches_identity() {
        let fx = fixture();
        let client = ClientInfo::default();
        let user = fx
            .users
            .signup(signup("a@b.com", "pw123456"), &client)
            .await
            .unwrap()
            .user;

        let outcome = fx.users.login(login("A@b.com", "pw123456"), &client).await.unwrap();
        let claims = fx.tokens.verify_access(&outcome.access_token).unwrap();
        assert_eq!(claims.subject_id().unwrap(), user.id);
        assert_eq!(claims.role, AccountRole::User);

        let refresh = fx.tokens.verify_refresh(&outcome.refresh_token).unwrap();
        assert_eq!(refresh.typ, TokenKind::Refresh);
        assert_eq!(refresh.sub, claims.sub);
    }

    #[tokio::test]
    async fn test_wrong_password_creates_nothing() {
        let fx = fixture();
        let client = ClientInfo::default();
        let user = fx
            .users
            .signup(signup("a@b.com", "pw123456"), &client)
            .await
            .unwrap()
            .user;
        fx.users.logout(user.id).await.unwrap();
        let issued_before = issued_total(&fx);

        let result = fx.users.login(login("a@b.com", "wrong-pass"), &client).await;
        assert!(matches!(result, Err(AccountError::WrongPassword)));
        assert_eq!(issued_total(&fx), issued_before);
        assert!(fx.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_unknown_email() {
        let fx = fixture();
        let result = fx
            .users
            .login(login("nobody@b.com", "pw123456"), &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AccountError::NotFound)));
    }

    #[tokio::test]
    async fn test_logout_twice() {
        let fx = fixture();
        let client = ClientInfo::default();
        let user = fx
            .users
            .signup(signup("a@b.com", "pw123456"), &client)
            .await
            .unwrap()
            .user;

        fx.users.logout(user.id).await.unwrap();
        fx.users.logout(user.id).await.unwrap();
        assert!(fx.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_forgot_password_overwrites_hash() {
        let fx = fixture();
        let client = ClientInfo::default();
        fx.users.signup(signup("a@b.com", "pw123456"), &client).await.unwrap();

        fx.users
            .forgot_password(
                ForgotPasswordRequest {
                    email: "a@b.com".to_string(),
                    password: "newpass123".to_string(),
                },
                &client,
            )
            .await
            .unwrap();

        assert!(matches!(
            fx.users.login(login("a@b.com", "pw123456"), &client).await,
            Err(AccountError::WrongPassword)
        ));
        assert!(fx.users.login(login("a@b.com", "newpass123"), &client).await.is_ok());

        let missing = fx
            .users
            .forgot_password(
                ForgotPasswordRequest {
                    email: "x@y.com".to_string(),
                    password: "newpass123".to_string(),
                },
                &client,
            )
            .await;
        assert!(matches!(missing, Err(AccountError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_session() {
        let fx = fixture();
        let client = ClientInfo::default();
        let user = fx
            .users
            .signup(signup("a@b.com", "pw123456"), &client)
            .await
            .unwrap()
            .user;

        fx.users.delete(user.id, user.id, AccountRole::User).await.unwrap();
        assert!(fx.store.is_empty().await);
        assert!(matches!(fx.users.info(user.id).await, Err(AccountError::NotFound)));

        let again = fx.users.delete(user.id, user.id, AccountRole::User).await;
        assert!(matches!(again, Err(AccountError::NotFound)));
    }

    #[tokio::test]
    async fn test_admin_seed_is_idempotent() {
        let fx = fixture();

        let first = fx.admins.seed("Admin@Example.com", "adminpass1", None).await.unwrap();
        assert!(matches!(first, SeedOutcome::Created(ref a) if a.email == "admin@example.com"));

        let second = fx.admins.seed("admin@example.com", "other-pass", None).await.unwrap();
        assert!(matches!(second, SeedOutcome::AlreadyPresent));

        // The original password still works
        let outcome = fx
            .admins
            .login(login("admin@example.com", "adminpass1"), &ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(
            fx.tokens.verify_access(&outcome.access_token).unwrap().role,
            AccountRole::Admin
        );
    }

    #[tokio::test]
    async fn test_admin_lists_and_deletes_users() {
        let fx = fixture();
        let client = ClientInfo::default();
        for i in 0..3 {
            fx.users
                .signup(signup(&format!("user{i}@b.com"), "pw123456"), &client)
                .await
                .unwrap();
        }

        let page = fx
            .admins
            .list_users(&PaginationQuery {
                limit: Some(2),
                page: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total_count, 3);
        assert_eq!(page.total_pages, 2);

        let victim = page.data[0].id;
        let admin_id = Uuid::new_v4();
        fx.admins.delete_user(victim, admin_id).await.unwrap();
        assert!(matches!(
            fx.admins.delete_user(victim, admin_id).await,
            Err(AccountError::NotFound)
        ));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(AccountError::DuplicateEmail.is_client_error());
        assert!(AccountError::WrongPassword.is_client_error());
        assert!(!AccountError::Storage("down".into()).is_client_error());
        assert!(!AccountError::Token(JwtError::ExpiredToken).is_client_error());
    }
}
