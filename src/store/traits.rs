//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::onboarding::model::{LifecycleMarker, UserProfile};
use crate::onboarding::state::Session;

/// Backend-agnostic database trait covering profiles, lifecycle markers,
/// and durable sessions.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    /// Insert-or-replace in one statement, keyed by `user_id`.
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;

    /// Get the profile for a user.
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError>;

    /// Insert a new profile. Fails with `Constraint` if one already exists.
    async fn insert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;

    /// Overwrite an existing profile. Returns false if there was none.
    async fn update_profile(&self, profile: &UserProfile) -> Result<bool, DatabaseError>;

    /// Total number of stored profiles.
    async fn count_profiles(&self) -> Result<i64, DatabaseError>;

    // ── Lifecycle markers ───────────────────────────────────────────
    //
    // Stores without the markers table return `FeatureUnavailable`.

    async fn lifecycle_marker_exists(&self, user_id: &str) -> Result<bool, DatabaseError>;

    async fn insert_lifecycle_marker(&self, marker: &LifecycleMarker)
    -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    async fn load_session(&self, user_id: &str) -> Result<Option<Session>, DatabaseError>;

    async fn save_session(&self, user_id: &str, session: &Session) -> Result<(), DatabaseError>;

    /// Returns true if a session was deleted.
    async fn delete_session(&self, user_id: &str) -> Result<bool, DatabaseError>;
}
