//! Authentication and session module
//!
//! - `password`: Argon2id hashing off the async executor
//! - `jwt`: access and refresh token signing and verification
//! - `session`: session record stores (Redis, memory)
//! - `manager`: session lifecycle, one session per role per account
//! - `gate`: bearer token plus session check for protected routes
//! - `refresh`: silent access-token refresh from the refresh cookie
//! - `models`, `repository`, `service`: accounts and their persistence

pub mod gate;
pub mod jwt;
pub mod manager;
pub mod models;
pub mod password;
pub mod refresh;
pub mod repository;
pub mod service;
pub mod session;

pub use gate::{require_session, AuthError, AuthGate, GatePolicy, Identity};
pub use jwt::{Claims, JwtConfig, JwtError, TokenIssuer, TokenKind, TokenSubject};
pub use manager::SessionManager;
pub use password::{PasswordConfig, PasswordError, PasswordHasher};
pub use refresh::{silent_refresh, AccessTokenCache, RefreshError, RefreshGate};
pub use repository::{
    AdminRepository, InMemoryAccountStore, PgAccountStore, RepositoryError, UserRepository,
};
pub use service::{AccountError, AdminService, SeedOutcome, UserService};
pub use session::{
    InMemorySessionStore, RedisSessionStore, SessionError, SessionRecord, SessionStore,
};
