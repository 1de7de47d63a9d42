//! Session store
//!
//! A session record is the server-side marker of an active login. Records are
//! keyed by subject id inside a role-scoped namespace, so one account can hold
//! a user session and an admin session side by side.
//!
//! Two backends are provided:
//! - [`RedisSessionStore`] for deployments (`SET`/`GET`/`DEL` with optional `EX`)
//! - [`InMemorySessionStore`] for tests and single-process development
//!
//! Author: hephaex@gmail.com

use super::repository::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use turnstile_core::{AccountRole, SessionNamespace};
use uuid::Uuid;

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Record absent or already invalidated
    #[error("Session not found")]
    NotFound,

    #[error("Session backend error: {0}")]
    Backend(String),

    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session ledger error: {0}")]
    Ledger(#[from] RepositoryError),
}

impl From<redis::RedisError> for SessionError {
    fn from(e: redis::RedisError) -> Self {
        SessionError::Backend(e.to_string())
    }
}

/// Value stored for an active login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub subject_id: Uuid,
    pub role: AccountRole,
    /// Marker unique to one login
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(subject_id: Uuid, role: AccountRole) -> Self {
        Self {
            subject_id,
            role,
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

/// Key-value storage for session records
///
/// `put` is an upsert (last write wins) and `delete` is idempotent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
        record: &SessionRecord,
    ) -> Result<(), SessionError>;

    /// Fetch a record; [`SessionError::NotFound`] when none is active
    async fn get(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
    ) -> Result<SessionRecord, SessionError>;

    /// Remove a record, returning whether one existed
    async fn delete(&self, subject_id: Uuid, namespace: SessionNamespace)
        -> Result<bool, SessionError>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), SessionError>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

// ============================================================================
// Redis
// ============================================================================

/// Redis-backed session store
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: Option<u64>,
}

impl RedisSessionStore {
    /// Connect to Redis at `url`
    ///
    /// The connection manager reconnects on its own after transient failures.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        ttl_secs: Option<u64>,
    ) -> Result<Self, SessionError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
            ttl_secs,
        })
    }

    fn key(&self, subject_id: Uuid, namespace: SessionNamespace) -> String {
        session_key(&self.prefix, subject_id, namespace)
    }
}

/// Redis key for a subject's record in `namespace`
pub fn session_key(prefix: &str, subject_id: Uuid, namespace: SessionNamespace) -> String {
    format!("{prefix}:{namespace}:{subject_id}")
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
        record: &SessionRecord,
    ) -> Result<(), SessionError> {
        let key = self.key(subject_id, namespace);
        let value = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        match self.ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(&key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(&key, value).await?;
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
    ) -> Result<SessionRecord, SessionError> {
        let key = self.key(subject_id, namespace);
        let mut conn = self.conn.clone();

        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(SessionError::NotFound),
        }
    }

    async fn delete(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
    ) -> Result<bool, SessionError> {
        let key = self.key(subject_id, namespace);
        let mut conn = self.conn.clone();

        let removed: i64 = conn.del(&key).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(SessionError::Backend(format!("unexpected PING reply: {pong}")))
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

// ============================================================================
// In-memory
// ============================================================================

type SessionKey = (SessionNamespace, Uuid);

/// Process-local session store
///
/// Backed by a moka cache, so records past the TTL are evicted rather than
/// kept until the next write for the same key.
#[derive(Clone)]
pub struct InMemorySessionStore {
    entries: Cache<SessionKey, SessionRecord>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Records never expire
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Number of live records across all namespaces
    pub async fn len(&self) -> usize {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count() as usize
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
        record: &SessionRecord,
    ) -> Result<(), SessionError> {
        self.entries
            .insert((namespace, subject_id), record.clone())
            .await;
        Ok(())
    }

    async fn get(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
    ) -> Result<SessionRecord, SessionError> {
        self.entries
            .get(&(namespace, subject_id))
            .await
            .ok_or(SessionError::NotFound)
    }

    async fn delete(
        &self,
        subject_id: Uuid,
        namespace: SessionNamespace,
    ) -> Result<bool, SessionError> {
        let key = (namespace, subject_id);
        let existed = self.entries.contains_key(&key);
        self.entries.invalidate(&key).await;
        Ok(existed)
    }

    async fn ping(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemorySessionStore::new();
        let subject = Uuid::new_v4();
        let record = SessionRecord::new(subject, AccountRole::User);

        store
            .put(subject, SessionNamespace::User, &record)
            .await
            .unwrap();
        let fetched = store.get(subject, SessionNamespace::User).await.unwrap();
        assert_eq!(fetched, record);

        assert!(store.delete(subject, SessionNamespace::User).await.unwrap());
        assert!(matches!(
            store.get(subject, SessionNamespace::User).await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let store = InMemorySessionStore::new();
        let subject = Uuid::new_v4();

        assert!(!store.delete(subject, SessionNamespace::Admin).await.unwrap());
        assert!(!store.delete(subject, SessionNamespace::Admin).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemorySessionStore::new();
        let subject = Uuid::new_v4();
        let first = SessionRecord::new(subject, AccountRole::User);
        let second = SessionRecord::new(subject, AccountRole::User);

        store.put(subject, SessionNamespace::User, &first).await.unwrap();
        store.put(subject, SessionNamespace::User, &second).await.unwrap();

        let fetched = store.get(subject, SessionNamespace::User).await.unwrap();
        assert_eq!(fetched.session_id, second.session_id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = InMemorySessionStore::new();
        let subject = Uuid::new_v4();

        store
            .put(
                subject,
                SessionNamespace::Admin,
                &SessionRecord::new(subject, AccountRole::Admin),
            )
            .await
            .unwrap();

        assert!(matches!(
            store.get(subject, SessionNamespace::User).await,
            Err(SessionError::NotFound)
        ));
        assert!(store.get(subject, SessionNamespace::Admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_records_expire_after_ttl() {
        let store = InMemorySessionStore::with_ttl(Duration::from_millis(20));
        let subject = Uuid::new_v4();

        store
            .put(
                subject,
                SessionNamespace::User,
                &SessionRecord::new(subject, AccountRole::User),
            )
            .await
            .unwrap();
        assert!(store.get(subject, SessionNamespace::User).await.is_ok());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            store.get(subject, SessionNamespace::User).await,
            Err(SessionError::NotFound)
        ));
        assert!(store.is_empty().await);
        assert!(!store.delete(subject, SessionNamespace::User).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_records_are_evicted_without_a_write() {
        let store = InMemorySessionStore::with_ttl(Duration::from_millis(20));
        for _ in 0..10 {
            let subject = Uuid::new_v4();
            store
                .put(
                    subject,
                    SessionNamespace::User,
                    &SessionRecord::new(subject, AccountRole::User),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 10);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn test_session_key_layout() {
        let subject = Uuid::nil();
        assert_eq!(
            session_key("turnstile", subject, SessionNamespace::Admin),
            "turnstile:admin-session:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_record_json_shape() {
        let record = SessionRecord::new(Uuid::new_v4(), AccountRole::Admin);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["role"], "admin");
        assert!(json.get("session_id").is_some());
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_redis_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let store = RedisSessionStore::connect(&url, "turnstile-test", Some(60))
            .await
            .unwrap();
        store.ping().await.unwrap();

        let subject = Uuid::new_v4();
        let record = SessionRecord::new(subject, AccountRole::User);
        store.put(subject, SessionNamespace::User, &record).await.unwrap();
        assert_eq!(
            store.get(subject, SessionNamespace::User).await.unwrap(),
            record
        );
        assert!(store.delete(subject, SessionNamespace::User).await.unwrap());
        assert!(!store.delete(subject, SessionNamespace::User).await.unwrap());
    }
}
