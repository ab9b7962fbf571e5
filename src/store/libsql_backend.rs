//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local files, in-memory databases and remote libSQL servers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::onboarding::model::{Answers, LifecycleMarker, UserProfile};
use crate::onboarding::state::Session;
use crate::store::migrations;
use crate::store::traits::Database;

/// Feature name reported when the lifecycle-marker table is missing.
const MARKERS_FEATURE: &str = "lifecycle markers";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await.map_err(|e| {
            DatabaseError::Connection(format!("Failed to open libSQL database: {e}"))
        })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Connect to a remote libSQL server and run migrations.
    pub async fn new_remote(url: &str, auth_token: &str) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to connect to remote database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(url, "Remote database connected");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libSQL error onto the store's error kinds.
///
/// Connection failures and SQLITE_BUSY/SQLITE_LOCKED are transient; constraint
/// failures are reported as such; anything else is a permanent query error.
fn classify(op: &str, e: libsql::Error) -> DatabaseError {
    let message = format!("{op}: {e}");
    let lower = message.to_lowercase();
    match e {
        libsql::Error::ConnectionFailed(_) => DatabaseError::Connection(message),
        libsql::Error::SqliteFailure(code, _) if matches!(code & 0xff, 5 | 6) => {
            DatabaseError::Connection(message)
        }
        _ if lower.contains("constraint failed") => DatabaseError::Constraint(message),
        _ if lower.contains("connection")
            || lower.contains("timed out")
            || lower.contains("stream")
            || lower.contains("hrana") =>
        {
            DatabaseError::Connection(message)
        }
        _ => DatabaseError::Query(message),
    }
}

/// Like [`classify`], but a missing markers table means the store simply
/// does not offer lifecycle markers.
fn classify_marker(op: &str, e: libsql::Error) -> DatabaseError {
    if e.to_string().contains("no such table") {
        return DatabaseError::FeatureUnavailable {
            feature: MARKERS_FEATURE.to_string(),
        };
    }
    classify(op, e)
}

fn row_to_profile(row: &libsql::Row) -> Result<UserProfile, DatabaseError> {
    let user_id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("profile user_id: {e}")))?;
    let email: Option<String> = row.get::<String>(1).ok();
    let is_business: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("profile is_business: {e}")))?;
    let answers_json: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("profile answers: {e}")))?;
    let answers: Answers = serde_json::from_str(&answers_json)
        .map_err(|e| DatabaseError::Serialization(format!("profile answers: {e}")))?;

    Ok(UserProfile {
        user_id,
        email,
        is_business: is_business != 0,
        answers,
    })
}

fn answers_json(profile: &UserProfile) -> Result<String, DatabaseError> {
    serde_json::to_string(&profile.answers).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

// ── Trait implementation ────────────────────────────────────────────

const PROFILE_COLUMNS: &str = "user_id, email, is_business, answers";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let answers = answers_json(profile)?;

        self.conn()
            .execute(
                "INSERT INTO profiles (user_id, email, is_business, answers, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (user_id) DO UPDATE SET
                    email = ?2, is_business = ?3, answers = ?4, updated_at = ?5",
                params![
                    profile.user_id.as_str(),
                    opt_text(profile.email.as_deref()),
                    i64::from(profile.is_business),
                    answers,
                    now
                ],
            )
            .await
            .map_err(|e| classify("upsert_profile", e))?;
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| classify("get_profile", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(classify("get_profile", e)),
        }
    }

    async fn insert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let answers = answers_json(profile)?;

        self.conn()
            .execute(
                "INSERT INTO profiles (user_id, email, is_business, answers, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    profile.user_id.as_str(),
                    opt_text(profile.email.as_deref()),
                    i64::from(profile.is_business),
                    answers,
                    now
                ],
            )
            .await
            .map_err(|e| classify("insert_profile", e))?;
        Ok(())
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let answers = answers_json(profile)?;

        let count = self
            .conn()
            .execute(
                "UPDATE profiles SET email = ?2, is_business = ?3, answers = ?4, updated_at = ?5
                 WHERE user_id = ?1",
                params![
                    profile.user_id.as_str(),
                    opt_text(profile.email.as_deref()),
                    i64::from(profile.is_business),
                    answers,
                    now
                ],
            )
            .await
            .map_err(|e| classify("update_profile", e))?;
        Ok(count > 0)
    }

    async fn count_profiles(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM profiles", ())
            .await
            .map_err(|e| classify("count_profiles", e))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("count_profiles: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(classify("count_profiles", e)),
        }
    }

    // ── Lifecycle markers ───────────────────────────────────────────

    async fn lifecycle_marker_exists(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM users WHERE telegram_id = ?1 LIMIT 1",
                params![user_id],
            )
            .await
            .map_err(|e| classify_marker("lifecycle_marker_exists", e))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(classify_marker("lifecycle_marker_exists", e)),
        }
    }

    async fn insert_lifecycle_marker(
        &self,
        marker: &LifecycleMarker,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO users (telegram_id, username, first_name, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (telegram_id) DO NOTHING",
                params![
                    marker.user_id.as_str(),
                    opt_text(marker.handle.as_deref()),
                    opt_text(marker.display_name.as_deref()),
                    now
                ],
            )
            .await
            .map_err(|e| classify_marker("insert_lifecycle_marker", e))?;
        Ok(())
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn load_session(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT state FROM sessions WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| classify("load_session", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let state: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("load_session: {e}")))?;
                let session = serde_json::from_str(&state)
                    .map_err(|e| DatabaseError::Serialization(format!("load_session: {e}")))?;
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(classify("load_session", e)),
        }
    }

    async fn save_session(&self, user_id: &str, session: &Session) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let state =
            serde_json::to_string(session).map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO sessions (user_id, state, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id) DO UPDATE SET state = ?2, updated_at = ?3",
                params![user_id, state, now],
            )
            .await
            .map_err(|e| classify("save_session", e))?;
        Ok(())
    }

    async fn delete_session(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .await
            .map_err(|e| classify("delete_session", e))?;
        Ok(count > 0)
    }
}
