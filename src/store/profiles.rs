//! Profile store adapter: upsert strategies, retries, lifecycle markers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;
use crate::error::DatabaseError;
use crate::onboarding::model::{LifecycleMarker, ProfileFields, UserProfile};
use crate::store::traits::Database;

/// How a profile upsert is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertStrategy {
    /// Single insert-or-update statement.
    #[default]
    Native,
    /// Look the record up, then update it or insert it.
    CheckThenWrite,
}

impl std::str::FromStr for UpsertStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "check_then_write" | "check-then-write" => Ok(Self::CheckThenWrite),
            other => Err(format!(
                "unknown upsert strategy '{other}' (expected 'native' or 'check_then_write')"
            )),
        }
    }
}

impl std::fmt::Display for UpsertStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::CheckThenWrite => write!(f, "check_then_write"),
        }
    }
}

/// Profile persistence as seen by the conversation engine.
#[derive(Clone)]
pub struct ProfileStore {
    db: Arc<dyn Database>,
    strategy: UpsertStrategy,
    retry: RetryPolicy,
}

impl ProfileStore {
    pub fn new(db: Arc<dyn Database>, strategy: UpsertStrategy, retry: RetryPolicy) -> Self {
        Self {
            db,
            strategy,
            retry,
        }
    }

    pub fn strategy(&self) -> UpsertStrategy {
        self.strategy
    }

    /// Write the profile for `user_id`, creating or replacing it.
    ///
    /// Replaying the same call leaves the same record. Transient errors are
    /// retried per the configured policy.
    pub async fn upsert_profile(
        &self,
        user_id: &str,
        fields: &ProfileFields,
    ) -> Result<(), DatabaseError> {
        let profile = &UserProfile::new(user_id, fields);
        with_retry(&self.retry, "upsert_profile", move || self.upsert_once(profile)).await
    }

    async fn upsert_once(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        match self.strategy {
            UpsertStrategy::Native => self.db.upsert_profile(profile).await,
            UpsertStrategy::CheckThenWrite => {
                if self.db.get_profile(&profile.user_id).await?.is_some() {
                    self.db.update_profile(profile).await?;
                    return Ok(());
                }
                match self.db.insert_profile(profile).await {
                    // Another writer created it between the check and the insert.
                    Err(DatabaseError::Constraint(_)) => {
                        self.db.update_profile(profile).await?;
                        Ok(())
                    }
                    other => other,
                }
            }
        }
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        with_retry(&self.retry, "get_profile", move || self.db.get_profile(user_id)).await
    }

    pub async fn count_profiles(&self) -> Result<i64, DatabaseError> {
        self.db.count_profiles().await
    }

    /// Record that this user has been greeted, if the store supports markers.
    ///
    /// A store without the markers table is not an error.
    pub async fn ensure_lifecycle_marker(
        &self,
        user_id: &str,
        handle: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let result = async {
            if self.db.lifecycle_marker_exists(user_id).await? {
                return Ok(());
            }
            let marker = LifecycleMarker {
                user_id: user_id.to_string(),
                handle: handle.map(str::to_string),
                display_name: display_name.map(str::to_string),
            };
            self.db.insert_lifecycle_marker(&marker).await
        }
        .await;

        match result {
            Err(e) if e.is_feature_unavailable() => {
                tracing::debug!(user_id, error = %e, "Store has no lifecycle markers; skipping");
                Ok(())
            }
            other => other,
        }
    }
}

/// Run `op`, retrying transient failures with exponential backoff and jitter.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DatabaseError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                attempt += 1;
                let delay = jittered(policy.backoff_for(attempt));
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient store error; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Add up to 50% random jitter to a backoff.
fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + extra)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::store::LibSqlBackend;

    async fn make_store(strategy: UpsertStrategy) -> (ProfileStore, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let store = ProfileStore::new(db.clone(), strategy, RetryPolicy::default());
        (store, db)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn strategy_parse_and_display() {
        assert_eq!("native".parse::<UpsertStrategy>().unwrap(), UpsertStrategy::Native);
        assert_eq!(
            "Check_Then_Write".parse::<UpsertStrategy>().unwrap(),
            UpsertStrategy::CheckThenWrite
        );
        assert!("merge".parse::<UpsertStrategy>().is_err());
        assert_eq!(UpsertStrategy::CheckThenWrite.to_string(), "check_then_write");
    }

    #[tokio::test]
    async fn both_strategies_keep_one_record() {
        for strategy in [UpsertStrategy::Native, UpsertStrategy::CheckThenWrite] {
            let (store, db) = make_store(strategy).await;
            let now = Utc::now();
            let provisional = ProfileFields::provisional("a@b.com", "Automate routine", now);
            store.upsert_profile("42", &provisional).await.unwrap();
            store.upsert_profile("42", &provisional).await.unwrap();

            let final_fields = ProfileFields {
                segment: "Acme Inc".into(),
                is_business: true,
                ..provisional
            };
            store.upsert_profile("42", &final_fields).await.unwrap();
            store.upsert_profile("42", &final_fields).await.unwrap();

            assert_eq!(db.count_profiles().await.unwrap(), 1, "{strategy}");
            let stored = store.get_profile("42").await.unwrap().unwrap();
            assert_eq!(stored, UserProfile::new("42", &final_fields), "{strategy}");
        }
    }

    #[tokio::test]
    async fn marker_is_written_once() {
        let (store, db) = make_store(UpsertStrategy::Native).await;
        store
            .ensure_lifecycle_marker("42", Some("ada_l"), Some("Ada"))
            .await
            .unwrap();
        store.ensure_lifecycle_marker("42", None, None).await.unwrap();
        assert!(db.lifecycle_marker_exists("42").await.unwrap());
    }

    #[tokio::test]
    async fn missing_marker_table_is_not_an_error() {
        let (store, db) = make_store(UpsertStrategy::Native).await;
        db.conn().execute("DROP TABLE users", ()).await.unwrap();
        store
            .ensure_lifecycle_marker("42", Some("ada_l"), Some("Ada"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast_policy(3), "test", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DatabaseError::Connection("reset by peer".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast_policy(2), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DatabaseError::Connection("down".into()))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast_policy(5), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DatabaseError::Query("syntax error".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_half() {
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(200));
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
