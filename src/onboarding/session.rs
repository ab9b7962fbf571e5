//! Session storage and per-user serialization.
//!
//! Sessions live in memory by default and vanish on restart. The
//! [`DbSessionStore`] variant persists them so users resume mid-flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::error::DatabaseError;
use crate::store::Database;

use super::state::Session;

/// Keyed storage for conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Session>, DatabaseError>;

    async fn put(&self, user_id: &str, session: Session) -> Result<(), DatabaseError>;

    async fn clear(&self, user_id: &str) -> Result<(), DatabaseError>;
}

/// Process-local sessions.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with an open session.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        Ok(self.sessions.read().await.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, session: Session) -> Result<(), DatabaseError> {
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session);
        Ok(())
    }

    async fn clear(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.sessions.write().await.remove(user_id);
        Ok(())
    }
}

/// Sessions persisted in the `sessions` table.
pub struct DbSessionStore {
    db: Arc<dyn Database>,
}

impl DbSessionStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for DbSessionStore {
    async fn get(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        self.db.load_session(user_id).await
    }

    async fn put(&self, user_id: &str, session: Session) -> Result<(), DatabaseError> {
        self.db.save_session(user_id, &session).await
    }

    async fn clear(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.db.delete_session(user_id).await.map(|_| ())
    }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// One async lock per user id. Different users never contend.
///
/// Entries are dropped when the last guard or waiter for a user goes away.
#[derive(Default)]
pub struct UserLocks {
    locks: LockMap,
}

/// Held while a user's message is being processed.
pub struct UserGuard {
    guard: Option<OwnedMutexGuard<()>>,
    user_id: String,
    locks: LockMap,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s conversation.
    pub async fn acquire(&self, user_id: &str) -> UserGuard {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(user_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        UserGuard {
            guard: Some(guard),
            user_id: user_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of users with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::onboarding::state::Stage;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn memory_store_put_get_clear() {
        let store = MemorySessionStore::new();
        assert!(store.get("42").await.unwrap().is_none());

        let mut session = Session::new();
        session.stage = Stage::AwaitingEmail;
        store.put("42", session.clone()).await.unwrap();
        assert_eq!(store.get("42").await.unwrap(), Some(session));
        assert_eq!(store.len().await, 1);

        store.clear("42").await.unwrap();
        store.clear("42").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn db_store_survives_new_handle() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let first = DbSessionStore::new(db.clone());
        let mut session = Session::new();
        session.collected.pain = Some("Automate routine".into());
        session.stage = Stage::AwaitingEmail;
        first.put("42", session.clone()).await.unwrap();

        let second = DbSessionStore::new(db);
        assert_eq!(second.get("42").await.unwrap(), Some(session));
        second.clear("42").await.unwrap();
        assert!(first.get("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.acquire("42").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("42").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
