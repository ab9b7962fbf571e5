//! Profile and lifecycle-marker data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Segment stored by the provisional write, before the user has answered.
pub const SEGMENT_UNKNOWN: &str = "unknown";

/// Free-text answers collected during onboarding.
///
/// Persisted as the JSON `answers` column of the profile record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answers {
    pub pain: String,
    pub segment: String,
    /// When the answers were captured.
    pub ts: DateTime<Utc>,
}

/// Durable onboarding profile, one per external user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub is_business: bool,
    pub answers: Answers,
}

impl UserProfile {
    pub fn new(user_id: &str, fields: &ProfileFields) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: fields.email.clone(),
            is_business: fields.is_business,
            answers: Answers {
                pain: fields.pain.clone(),
                segment: fields.segment.clone(),
                ts: fields.answered_at,
            },
        }
    }
}

/// The fields written by one profile upsert.
///
/// `answered_at` is chosen by the caller so that replaying the same write
/// stores identical state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFields {
    pub email: Option<String>,
    pub pain: String,
    pub segment: String,
    pub is_business: bool,
    pub answered_at: DateTime<Utc>,
}

impl ProfileFields {
    /// Fields for the write made right after email capture.
    pub fn provisional(email: &str, pain: &str, answered_at: DateTime<Utc>) -> Self {
        Self {
            email: Some(email.to_string()),
            pain: pain.to_string(),
            segment: SEGMENT_UNKNOWN.to_string(),
            is_business: false,
            answered_at,
        }
    }
}

/// "We have greeted this user before" marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleMarker {
    pub user_id: String,
    /// Transport handle, e.g. the Telegram username.
    pub handle: Option<String>,
    pub display_name: Option<String>,
}
