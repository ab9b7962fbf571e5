//! Onboarding: the scripted question flow for new users.
//!
//! A user is greeted, asked whether they know the product, what they want
//! help with, their email and their segment. The answers become a
//! `UserProfile`, written once after the email (provisional) and again after
//! the segment (final).

pub mod manager;
pub mod model;
pub mod prompts;
pub mod routes;
pub mod session;
pub mod state;
pub mod validate;

pub use manager::{Inbound, OnboardingDeps, OnboardingManager};
pub use model::{Answers, LifecycleMarker, ProfileFields, UserProfile};
pub use routes::{ProfileRouteState, profile_routes};
pub use session::{DbSessionStore, MemorySessionStore, SessionStore, UserLocks};
pub use state::{Collected, Session, Stage};
pub use validate::{
    Classification, KeywordClassifier, SegmentClassifier, SegmentTrack, classify_segment,
    is_valid_email,
};
