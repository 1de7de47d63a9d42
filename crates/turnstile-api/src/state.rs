//! Application state management
//!
//! [`AppState`] wires the auth components together once at startup. Handlers
//! receive it as `State<Arc<AppState>>`; the two gates and the refresh gate
//! are cloned out of it into their middleware layers.
//!
//! Author: hephaex@gmail.com

use crate::auth::gate::{AuthGate, GatePolicy};
use crate::auth::jwt::{JwtConfig, TokenIssuer};
use crate::auth::manager::SessionManager;
use crate::auth::password::{PasswordConfig, PasswordHasher};
use crate::auth::refresh::{AccessTokenCache, RefreshGate};
use crate::auth::repository::{
    AdminRepository, InMemoryAccountStore, PgAccountStore, RepositoryError, SessionLedger,
    UserRepository,
};
use crate::auth::service::{AdminService, UserService};
use crate::auth::session::{InMemorySessionStore, RedisSessionStore, SessionError, SessionStore};
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;
use turnstile_core::{AppConfig, StorageBackend};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Account store unavailable: {0}")]
    Accounts(#[from] RepositoryError),

    #[error("Session store unavailable: {0}")]
    Sessions(#[from] SessionError),
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    pub metrics: Metrics,
    pub tokens: Arc<TokenIssuer>,
    pub sessions: Arc<SessionManager>,
    pub users: Arc<UserService>,
    pub admins: Arc<AdminService>,
    pub user_gate: AuthGate,
    pub admin_gate: AuthGate,
    pub refresh: RefreshGate,
    user_store: Arc<dyn UserRepository>,
    session_store: Arc<dyn SessionStore>,
}

impl AppState {
    /// Connect to the configured backends and build the state
    pub async fn connect(config: AppConfig) -> Result<Self, StateError> {
        match config.database.backend {
            StorageBackend::Postgres => {
                let db = &config.database;
                let accounts =
                    Arc::new(PgAccountStore::connect(&db.postgres_url, db.postgres_pool_size).await?);
                info!("Connected to PostgreSQL");

                let sessions = Arc::new(
                    RedisSessionStore::connect(
                        &db.redis_url,
                        db.session_key_prefix.clone(),
                        db.session_ttl_secs,
                    )
                    .await?,
                );
                sessions.ping().await?;
                info!("Connected to Redis");

                Self::assemble(config, accounts.clone(), accounts.clone(), accounts, sessions)
            }
            StorageBackend::Memory => {
                info!("Using in-memory account and session stores");
                Self::in_memory(config)
            }
        }
    }

    /// State backed entirely by process memory
    pub fn in_memory(config: AppConfig) -> Result<Self, StateError> {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let sessions = Arc::new(match config.database.session_ttl_secs {
            Some(ttl) => InMemorySessionStore::with_ttl(Duration::from_secs(ttl)),
            None => InMemorySessionStore::new(),
        });
        Self::assemble(config, accounts.clone(), accounts.clone(), accounts, sessions)
    }

    /// Build the component graph over already-connected stores
    pub fn assemble(
        config: AppConfig,
        user_store: Arc<dyn UserRepository>,
        admin_store: Arc<dyn AdminRepository>,
        ledger: Arc<dyn SessionLedger>,
        session_store: Arc<dyn SessionStore>,
    ) -> Result<Self, StateError> {
        let metrics = Metrics::new()?;
        let auth = &config.auth;

        let tokens = Arc::new(
            TokenIssuer::new(JwtConfig::from(auth)).with_metrics(metrics.tokens_issued.clone()),
        );
        let hasher = PasswordHasher::new(PasswordConfig::from(auth));

        let cache = auth
            .refresh_cache_enabled
            .then(|| AccessTokenCache::for_access_lifetime(auth.access_token_ttl_secs()));

        let mut manager = SessionManager::new(session_store.clone())
            .with_ledger(ledger)
            .with_metrics(metrics.sessions.clone());
        if let Some(cache) = &cache {
            manager = manager.with_refresh_cache(cache.clone());
        }
        let sessions = Arc::new(manager);

        let users = Arc::new(
            UserService::new(
                user_store.clone(),
                sessions.clone(),
                tokens.clone(),
                hasher.clone(),
            )
            .with_metrics(metrics.logins.clone()),
        );
        let admins = Arc::new(
            AdminService::new(
                admin_store.clone(),
                users.clone(),
                sessions.clone(),
                tokens.clone(),
                hasher,
            )
            .with_metrics(metrics.logins.clone()),
        );

        let user_gate = AuthGate::new(GatePolicy::USER, tokens.clone(), session_store.clone());
        let admin_gate = AuthGate::new(GatePolicy::ADMIN, tokens.clone(), session_store.clone());

        let mut refresh = RefreshGate::new(
            tokens.clone(),
            user_store.clone(),
            admin_store,
            auth.refresh_cookie_name.clone(),
        )
        .with_metrics(metrics.silent_refresh.clone());
        if let Some(cache) = cache {
            refresh = refresh.with_cache(cache);
        }

        Ok(Self {
            config,
            start_time: Instant::now(),
            metrics,
            tokens,
            sessions,
            users,
            admins,
            user_gate,
            admin_gate,
            refresh,
            user_store,
            session_store,
        })
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn session_backend(&self) -> &'static str {
        self.session_store.backend()
    }

    /// Ping the account store
    pub async fn accounts_ready(&self) -> Result<(), RepositoryError> {
        self.user_store.ping().await
    }

    /// Ping the session store
    pub async fn sessions_ready(&self) -> Result<(), SessionError> {
        self.session_store.ping().await
    }
}
