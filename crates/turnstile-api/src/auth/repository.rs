//! Account persistence
//!
//! Two repositories, one per account kind, plus the session ledger. Each has
//! a PostgreSQL implementation (sqlx) and an in-memory one for tests and the
//! `memory` storage backend.
//!
//! Emails reach the repositories already normalized; uniqueness is enforced
//! by the store (a unique index in PostgreSQL, a check under the write lock
//! in memory) and reported as [`RepositoryError::DuplicateEmail`].

use super::models::{
    AdminRecord, NewAdmin, NewUser, ProfileUpdate, SessionLogEntry, UserRecord,
};
use super::session::SessionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use turnstile_core::AccountRole;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Email is already registered.")]
    DuplicateEmail,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::DuplicateEmail,
            _ => RepositoryError::Database(e.to_string()),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepositoryError>;

    /// Overwrite the password hash; returns false when no such user exists
    async fn update_password_by_email(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RepositoryError>;

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<UserRecord>, RepositoryError>;

    /// Remove a user; returns false when it was already gone
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// A page of users, oldest first, with the total count
    async fn list(&self, limit: u32, offset: u64) -> Result<(Vec<UserRecord>, u64), RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AdminRepository: Send + Sync {
    async fn create(&self, admin: NewAdmin) -> Result<AdminRecord, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<AdminRecord>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminRecord>, RepositoryError>;
}

/// Durable login history
///
/// Only the session store decides whether a login is live; the ledger is a
/// record of what happened and is never read by the auth gate.
#[async_trait]
pub trait SessionLedger: Send + Sync {
    /// Close open entries for the record's subject and role, then open one for it
    async fn open(&self, record: &SessionRecord) -> Result<(), RepositoryError>;

    /// Close open entries; returns how many were closed
    async fn close(&self, subject_id: Uuid, role: AccountRole) -> Result<u64, RepositoryError>;

    /// Entries for the subject and role, newest first
    async fn history(
        &self,
        subject_id: Uuid,
        role: AccountRole,
    ) -> Result<Vec<SessionLogEntry>, RepositoryError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        name TEXT,
        phone_number TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (email)",
    r#"
    CREATE TABLE IF NOT EXISTS admins (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        name TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS admins_email_key ON admins (email)",
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        subject_id UUID NOT NULL,
        role TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        ended_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS sessions_subject_idx ON sessions (subject_id, role, started_at)",
];

const USER_COLUMNS: &str = "id, email, password_hash, name, phone_number, created_at, updated_at";

/// PostgreSQL account store backing both repositories
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Connect and create the tables if they do not exist yet
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Database(format!("PostgreSQL connection failed: {e}")))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgAccountStore {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepositoryError> {
        let record: UserRecord = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, phone_number)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.phone_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let record = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepositoryError> {
        let record = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn update_password_by_email(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE email = $1")
                .bind(email)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<UserRecord>, RepositoryError> {
        let record = sqlx::query_as(&format!(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                phone_number = COALESCE($3, phone_number),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.phone_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<(Vec<UserRecord>, u64), RepositoryError> {
        let rows: Vec<UserRecord> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok((rows, total.max(0) as u64))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AdminRepository for PgAccountStore {
    async fn create(&self, admin: NewAdmin) -> Result<AdminRecord, RepositoryError> {
        let record = sqlx::query_as(
            r#"
            INSERT INTO admins (id, email, password_hash, name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&admin.email)
        .bind(&admin.password_hash)
        .bind(&admin.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AdminRecord>, RepositoryError> {
        let record = sqlx::query_as(
            "SELECT id, email, password_hash, name, created_at FROM admins WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminRecord>, RepositoryError> {
        let record = sqlx::query_as(
            "SELECT id, email, password_hash, name, created_at FROM admins WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

#[derive(sqlx::FromRow)]
struct SessionLogRow {
    id: Uuid,
    subject_id: Uuid,
    role: String,
    active: bool,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionLogRow> for SessionLogEntry {
    type Error = RepositoryError;

    fn try_from(row: SessionLogRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|e: turnstile_core::UnknownRole| RepositoryError::Database(e.to_string()))?;
        Ok(Self {
            session_id: row.id,
            subject_id: row.subject_id,
            role,
            active: row.active,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

const CLOSE_OPEN_SESSIONS: &str = r#"
    UPDATE sessions SET active = FALSE, ended_at = NOW()
    WHERE subject_id = $1 AND role = $2 AND active
"#;

#[async_trait]
impl SessionLedger for PgAccountStore {
    async fn open(&self, record: &SessionRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(CLOSE_OPEN_SESSIONS)
            .bind(record.subject_id)
            .bind(record.role.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO sessions (id, subject_id, role, started_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.session_id)
        .bind(record.subject_id)
        .bind(record.role.as_str())
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn close(&self, subject_id: Uuid, role: AccountRole) -> Result<u64, RepositoryError> {
        let result = sqlx::query(CLOSE_OPEN_SESSIONS)
            .bind(subject_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn history(
        &self,
        subject_id: Uuid,
        role: AccountRole,
    ) -> Result<Vec<SessionLogEntry>, RepositoryError> {
        let rows: Vec<SessionLogRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, role, active, started_at, ended_at
            FROM sessions
            WHERE subject_id = $1 AND role = $2
            ORDER BY started_at DESC, id
            "#,
        )
        .bind(subject_id)
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionLogEntry::try_from).collect()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local account store backing both repositories
#[derive(Default)]
pub struct InMemoryAccountStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
    admins: RwLock<HashMap<Uuid, AdminRecord>>,
    sessions: RwLock<Vec<SessionLogEntry>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryAccountStore {
    async fn create(&self, user: NewUser) -> Result<UserRecord, RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::DuplicateEmail);
        }

        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone_number: user.phone_number,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_password_by_email(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().await;
        match users.values_mut().find(|u| u.email == email) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<UserRecord>, RepositoryError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(name) = &update.name {
            user.name = Some(name.clone());
        }
        if let Some(phone_number) = &update.phone_number {
            user.phone_number = Some(phone_number.clone());
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.users.write().await.remove(&id).is_some())
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<(Vec<UserRecord>, u64), RepositoryError> {
        let users = self.users.read().await;
        let mut all: Vec<&UserRecord> = users.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let page = all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, users.len() as u64))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[async_trait]
impl AdminRepository for InMemoryAccountStore {
    async fn create(&self, admin: NewAdmin) -> Result<AdminRecord, RepositoryError> {
        let mut admins = self.admins.write().await;
        if admins.values().any(|a| a.email == admin.email) {
            return Err(RepositoryError::DuplicateEmail);
        }

        let record = AdminRecord {
            id: Uuid::new_v4(),
            email: admin.email,
            password_hash: admin.password_hash,
            name: admin.name,
            created_at: Utc::now(),
        };
        admins.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AdminRecord>, RepositoryError> {
        let admins = self.admins.read().await;
        Ok(admins.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminRecord>, RepositoryError> {
        Ok(self.admins.read().await.get(&id).cloned())
    }
}

fn close_open(entries: &mut [SessionLogEntry], subject_id: Uuid, role: AccountRole) -> u64 {
    let now = Utc::now();
    let mut closed = 0;
    for entry in entries
        .iter_mut()
        .filter(|e| e.active && e.subject_id == subject_id && e.role == role)
    {
        entry.active = false;
        entry.ended_at = Some(now);
        closed += 1;
    }
    closed
}

#[async_trait]
impl SessionLedger for InMemoryAccountStore {
    async fn open(&self, record: &SessionRecord) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        close_open(&mut sessions, record.subject_id, record.role);
        sessions.push(SessionLogEntry {
            session_id: record.session_id,
            subject_id: record.subject_id,
            role: record.role,
            active: true,
            started_at: record.created_at,
            ended_at: None,
        });
        Ok(())
    }

    async fn close(&self, subject_id: Uuid, role: AccountRole) -> Result<u64, RepositoryError> {
        Ok(close_open(&mut self.sessions.write().await, subject_id, role))
    }

    async fn history(
        &self,
        subject_id: Uuid,
        role: AccountRole,
    ) -> Result<Vec<SessionLogEntry>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .rev()
            .filter(|e| e.subject_id == subject_id && e.role == role)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: Some("Alice".to_string()),
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = InMemoryAccountStore::new();
        let created = UserRepository::create(&store, new_user("a@b.com")).await.unwrap();

        let by_email = UserRepository::find_by_email(&store, "a@b.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email, created);

        let by_id = UserRepository::find_by_id(&store, created.id).await.unwrap();
        assert_eq!(by_id, Some(created));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = InMemoryAccountStore::new();
        UserRepository::create(&store, new_user("a@b.com")).await.unwrap();

        let result = UserRepository::create(&store, new_user("a@b.com")).await;
        assert!(matches!(result, Err(RepositoryError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_update_password_and_profile() {
        let store = InMemoryAccountStore::new();
        let user = UserRepository::create(&store, new_user("a@b.com")).await.unwrap();

        assert!(store.update_password_by_email("a@b.com", "new-hash").await.unwrap());
        assert!(!store.update_password_by_email("x@y.com", "new-hash").await.unwrap());

        let updated = store
            .update_profile(
                user.id,
                &ProfileUpdate {
                    name: None,
                    phone_number: Some("9876543210".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.password_hash, "new-hash");
        assert_eq!(updated.name.as_deref(), Some("Alice"));
        assert_eq!(updated.phone_number.as_deref(), Some("9876543210"));

        assert!(store
            .update_profile(Uuid::new_v4(), &ProfileUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let store = InMemoryAccountStore::new();
        let user = UserRepository::create(&store, new_user("a@b.com")).await.unwrap();

        assert!(store.delete_by_id(user.id).await.unwrap());
        assert!(!store.delete_by_id(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_pages() {
        let store = InMemoryAccountStore::new();
        for i in 0..5 {
            UserRepository::create(&store, new_user(&format!("user{i}@b.com")))
                .await
                .unwrap();
        }

        let (first, total) = store.list(2, 0).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);

        let (last, _) = store.list(2, 4).await.unwrap();
        assert_eq!(last.len(), 1);

        let (beyond, _) = store.list(2, 10).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn test_admins_are_separate_from_users() {
        let store = InMemoryAccountStore::new();
        UserRepository::create(&store, new_user("same@b.com")).await.unwrap();

        let admin = AdminRepository::create(
            &store,
            NewAdmin {
                email: "same@b.com".to_string(),
                password_hash: "hash".to_string(),
                name: None,
            },
        )
        .await
        .unwrap();

        let found = AdminRepository::find_by_id(&store, admin.id).await.unwrap();
        assert_eq!(found.map(|a| a.email), Some("same@b.com".to_string()));
    }

    #[tokio::test]
    async fn test_ledger_open_closes_previous_entry() {
        let store = InMemoryAccountStore::new();
        let subject = Uuid::new_v4();
        let first = SessionRecord::new(subject, AccountRole::User);
        let second = SessionRecord::new(subject, AccountRole::User);

        store.open(&first).await.unwrap();
        store.open(&second).await.unwrap();

        let history = store.history(subject, AccountRole::User).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].session_id, second.session_id);
        assert!(history[0].active);
        assert!(!history[1].active);
        assert!(history[1].ended_at.is_some());

        assert_eq!(store.close(subject, AccountRole::User).await.unwrap(), 1);
        assert_eq!(store.close(subject, AccountRole::User).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_roles_are_separate() {
        let store = InMemoryAccountStore::new();
        let subject = Uuid::new_v4();
        store
            .open(&SessionRecord::new(subject, AccountRole::User))
            .await
            .unwrap();
        store
            .open(&SessionRecord::new(subject, AccountRole::Admin))
            .await
            .unwrap();

        store.close(subject, AccountRole::Admin).await.unwrap();
        let user = store.history(subject, AccountRole::User).await.unwrap();
        assert_eq!(user.len(), 1);
        assert!(user[0].active);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_postgres_round_trip() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/turnstile_test".into());
        let store = PgAccountStore::connect(&url, 2).await.unwrap();
        let email = format!("{}@example.com", Uuid::new_v4());

        let user = UserRepository::create(&store, new_user(&email)).await.unwrap();
        let dup = UserRepository::create(&store, new_user(&email)).await;
        assert!(matches!(dup, Err(RepositoryError::DuplicateEmail)));

        assert!(store.delete_by_id(user.id).await.unwrap());

        let record = SessionRecord::new(user.id, AccountRole::User);
        store.open(&record).await.unwrap();
        assert_eq!(store.close(user.id, AccountRole::User).await.unwrap(), 1);
        let history = store.history(user.id, AccountRole::User).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].active);
    }
}
