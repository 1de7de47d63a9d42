//! Session lifecycle
//!
//! [`SessionManager`] is the only writer of session records. A login always
//! clears the previous record for the role's namespace before writing the new
//! one, which keeps one session per role per account without any locking:
//! concurrent logins race at the store and the last write wins.
//!
//! With a [`SessionLedger`] attached, every login and logout is also recorded
//! durably. The ledger is written first; the session store stays the only
//! authority the auth gate consults.

use super::models::SessionLogEntry;
use super::refresh::AccessTokenCache;
use super::repository::SessionLedger;
use super::session::{SessionError, SessionRecord, SessionStore};
use prometheus::IntCounterVec;
use std::sync::Arc;
use tracing::debug;
use turnstile_core::AccountRole;
use uuid::Uuid;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ledger: Option<Arc<dyn SessionLedger>>,
    refresh_cache: Option<AccessTokenCache>,
    events: Option<IntCounterVec>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            ledger: None,
            refresh_cache: None,
            events: None,
        }
    }

    /// Record logins and logouts in `ledger`
    pub fn with_ledger(mut self, ledger: Arc<dyn SessionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Drop memoized refresh tokens whenever a subject's session changes
    pub fn with_refresh_cache(mut self, cache: AccessTokenCache) -> Self {
        self.refresh_cache = Some(cache);
        self
    }

    /// Count lifecycle events in `counter`, labelled by role and event
    pub fn with_metrics(mut self, counter: IntCounterVec) -> Self {
        self.events = Some(counter);
        self
    }

    /// Start a session, replacing any existing one for this role
    pub async fn login(
        &self,
        subject_id: Uuid,
        role: AccountRole,
    ) -> Result<SessionRecord, SessionError> {
        let namespace = role.namespace();
        let record = SessionRecord::new(subject_id, role);
        if let Some(ledger) = &self.ledger {
            ledger.open(&record).await?;
        }

        let replaced = self.store.delete(subject_id, namespace).await?;
        self.store.put(subject_id, namespace, &record).await?;

        self.forget_refreshed_token(subject_id, role).await;
        self.count(role, if replaced { "replaced" } else { "created" });

        debug!(
            subject_id = %subject_id,
            namespace = %namespace,
            session_id = %record.session_id,
            replaced,
            "Session started"
        );
        Ok(record)
    }

    /// End the session for this role; ending an absent session is not an error
    pub async fn logout(&self, subject_id: Uuid, role: AccountRole) -> Result<bool, SessionError> {
        let namespace = role.namespace();
        if let Some(ledger) = &self.ledger {
            ledger.close(subject_id, role).await?;
        }
        let existed = self.store.delete(subject_id, namespace).await?;

        self.forget_refreshed_token(subject_id, role).await;
        if existed {
            self.count(role, "ended");
        }

        debug!(subject_id = %subject_id, namespace = %namespace, existed, "Session ended");
        Ok(existed)
    }

    /// Current record for the role, or [`SessionError::NotFound`]
    pub async fn current(
        &self,
        subject_id: Uuid,
        role: AccountRole,
    ) -> Result<SessionRecord, SessionError> {
        self.store.get(subject_id, role.namespace()).await
    }

    /// Recorded logins for the role, newest first; empty without a ledger
    pub async fn history(
        &self,
        subject_id: Uuid,
        role: AccountRole,
    ) -> Result<Vec<SessionLogEntry>, SessionError> {
        match &self.ledger {
            Some(ledger) => Ok(ledger.history(subject_id, role).await?),
            None => Ok(Vec::new()),
        }
    }

    async fn forget_refreshed_token(&self, subject_id: Uuid, role: AccountRole) {
        if let Some(cache) = &self.refresh_cache {
            cache.invalidate(subject_id, role).await;
        }
    }

    fn count(&self, role: AccountRole, event: &str) {
        if let Some(counter) = &self.events {
            counter.with_label_values(&[role.as_str(), event]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repository::InMemoryAccountStore;
    use crate::auth::session::InMemorySessionStore;
    use std::time::Duration;
    use turnstile_core::SessionNamespace;

    fn manager() -> (SessionManager, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        (SessionManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_login_creates_record() {
        let (manager, store) = manager();
        let subject = Uuid::new_v4();

        let record = manager.login(subject, AccountRole::User).await.unwrap();
        let stored = store.get(subject, SessionNamespace::User).await.unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.role, AccountRole::User);
    }

    #[tokio::test]
    async fn test_relogin_replaces_record() {
        let (manager, store) = manager();
        let subject = Uuid::new_v4();

        let first = manager.login(subject, AccountRole::User).await.unwrap();
        let second = manager.login(subject, AccountRole::User).await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        let stored = store.get(subject, SessionNamespace::User).await.unwrap();
        assert_eq!(stored.session_id, second.session_id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (manager, store) = manager();
        let subject = Uuid::new_v4();

        manager.login(subject, AccountRole::Admin).await.unwrap();
        assert!(manager.logout(subject, AccountRole::Admin).await.unwrap());
        assert!(!manager.logout(subject, AccountRole::Admin).await.unwrap());
        assert!(store.is_empty().await);
        assert!(matches!(
            manager.current(subject, AccountRole::Admin).await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_roles_do_not_share_sessions() {
        let (manager, _) = manager();
        let subject = Uuid::new_v4();

        manager.login(subject, AccountRole::User).await.unwrap();
        manager.login(subject, AccountRole::Admin).await.unwrap();
        manager.logout(subject, AccountRole::Admin).await.unwrap();

        assert!(manager.current(subject, AccountRole::User).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_logins_leave_one_record() {
        let (manager, store) = manager();
        let manager = Arc::new(manager);
        let subject = Uuid::new_v4();

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.login(subject, AccountRole::User).await.unwrap() }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.login(subject, AccountRole::User).await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(store.len().await, 1);
        let survivor = store.get(subject, SessionNamespace::User).await.unwrap();
        assert!(survivor.session_id == a.session_id || survivor.session_id == b.session_id);
    }

    #[tokio::test]
    async fn test_logout_drops_memoized_refresh_token() {
        let cache = AccessTokenCache::new(Duration::from_secs(60), 100);
        let store = Arc::new(InMemorySessionStore::new());
        let manager = SessionManager::new(store).with_refresh_cache(cache.clone());
        let subject = Uuid::new_v4();

        manager.login(subject, AccountRole::User).await.unwrap();
        cache
            .insert(subject, AccountRole::User, "cached-token".to_string())
            .await;
        assert!(cache.get(subject, AccountRole::User).await.is_some());

        manager.logout(subject, AccountRole::User).await.unwrap();
        assert!(cache.get(subject, AccountRole::User).await.is_none());
    }

    #[tokio::test]
    async fn test_login_then_logout_leaves_one_closed_ledger_entry() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let store = Arc::new(InMemorySessionStore::new());
        let manager = SessionManager::new(store.clone()).with_ledger(accounts.clone());
        let subject = Uuid::new_v4();

        let record = manager.login(subject, AccountRole::User).await.unwrap();
        manager.logout(subject, AccountRole::User).await.unwrap();

        let history = accounts.history(subject, AccountRole::User).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].session_id, record.session_id);
        assert!(!history[0].active);
        assert!(history[0].ended_at.is_some());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_relogin_closes_previous_ledger_entry() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let manager = SessionManager::new(Arc::new(InMemorySessionStore::new()))
            .with_ledger(accounts.clone());
        let subject = Uuid::new_v4();

        manager.login(subject, AccountRole::Admin).await.unwrap();
        let latest = manager.login(subject, AccountRole::Admin).await.unwrap();

        let history = accounts.history(subject, AccountRole::Admin).await.unwrap();
        let open: Vec<_> = history.iter().filter(|e| e.active).collect();
        assert_eq!(history.len(), 2);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].session_id, latest.session_id);
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_counted() {
        let counter = IntCounterVec::new(
            prometheus::Opts::new("sessions", "session events"),
            &["role", "event"],
        )
        .unwrap();
        let store = Arc::new(InMemorySessionStore::new());
        let manager = SessionManager::new(store).with_metrics(counter.clone());
        let subject = Uuid::new_v4();

        manager.login(subject, AccountRole::User).await.unwrap();
        manager.login(subject, AccountRole::User).await.unwrap();
        manager.logout(subject, AccountRole::User).await.unwrap();
        manager.logout(subject, AccountRole::User).await.unwrap();

        assert_eq!(counter.with_label_values(&["user", "created"]).get(), 1);
        assert_eq!(counter.with_label_values(&["user", "replaced"]).get(), 1);
        assert_eq!(counter.with_label_values(&["user", "ended"]).get(), 1);
    }
}
