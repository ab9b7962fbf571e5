//! OnboardingManager: the conversation engine.
//!
//! Maps (session, inbound text) to (new session, replies, store effects).
//! Every operation for a user runs under that user's lock, so messages from
//! one user are handled strictly in order while other users proceed in
//! parallel. Store failures never stall the conversation: they are logged and
//! the user moves on.

use std::sync::Arc;

use chrono::Utc;

use crate::channels::{IncomingMessage, OutgoingResponse};
use crate::config::FlowConfig;
use crate::store::ProfileStore;

use super::model::ProfileFields;
use super::prompts;
use super::session::{SessionStore, UserLocks};
use super::state::{Session, Stage};
use super::validate::{SegmentClassifier, is_substantive, is_valid_email, segment_track};

/// Collaborators the engine needs.
pub struct OnboardingDeps {
    pub profiles: ProfileStore,
    pub sessions: Arc<dyn SessionStore>,
    pub classifier: Arc<dyn SegmentClassifier>,
    pub flow: FlowConfig,
}

/// What an inbound text asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// `/start`, `/diagnostic` or the "Start Diagnostic" button.
    Start,
    /// `/reset`: forget the in-progress session.
    Reset,
    /// Anything else, trimmed.
    Text(&'a str),
}

impl<'a> Inbound<'a> {
    pub fn parse(text: &'a str) -> Self {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case(prompts::START_DIAGNOSTIC) {
            return Self::Start;
        }
        if let Some(command) = trimmed.strip_prefix('/') {
            // "/start@SomeBot payload" → "start"
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('@')
                .next()
                .unwrap_or_default()
                .to_lowercase();
            match name.as_str() {
                "start" | "diagnostic" => return Self::Start,
                "reset" => return Self::Reset,
                _ => {}
            }
        }
        Self::Text(trimmed)
    }
}

/// Who sent a message, as far as the transport knows.
#[derive(Debug, Clone, Copy, Default)]
struct Sender<'a> {
    display_name: Option<&'a str>,
    handle: Option<&'a str>,
}

/// Drives each user through the onboarding questions.
pub struct OnboardingManager {
    deps: OnboardingDeps,
    locks: UserLocks,
}

impl OnboardingManager {
    pub fn new(deps: OnboardingDeps) -> Self {
        Self {
            deps,
            locks: UserLocks::new(),
        }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.deps.profiles
    }

    /// Handle one inbound message from a transport.
    pub async fn handle(&self, msg: &IncomingMessage) -> Vec<OutgoingResponse> {
        let sender = Sender {
            display_name: msg.user_name.as_deref(),
            handle: msg.handle.as_deref(),
        };
        let _guard = self.locks.acquire(&msg.user_id).await;
        match Inbound::parse(&msg.content) {
            Inbound::Start => self.start_flow(&msg.user_id, sender).await,
            Inbound::Reset => self.reset_flow(&msg.user_id).await,
            Inbound::Text(text) => self.text_flow(&msg.user_id, text, sender).await,
        }
    }

    /// A start signal: (re)open the session and greet the user.
    pub async fn on_start(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        handle: Option<&str>,
    ) -> Vec<OutgoingResponse> {
        let _guard = self.locks.acquire(user_id).await;
        self.start_flow(
            user_id,
            Sender {
                display_name,
                handle,
            },
        )
        .await
    }

    /// A free-text message. Users without a session are started first.
    pub async fn on_text(&self, user_id: &str, text: &str) -> Vec<OutgoingResponse> {
        let _guard = self.locks.acquire(user_id).await;
        self.text_flow(user_id, text.trim(), Sender::default()).await
    }

    /// Forget the user's in-progress session.
    pub async fn on_reset(&self, user_id: &str) -> Vec<OutgoingResponse> {
        let _guard = self.locks.acquire(user_id).await;
        self.reset_flow(user_id).await
    }

    async fn start_flow(&self, user_id: &str, sender: Sender<'_>) -> Vec<OutgoingResponse> {
        if let Err(e) = self
            .deps
            .profiles
            .ensure_lifecycle_marker(user_id, sender.handle, sender.display_name)
            .await
        {
            tracing::warn!(user_id, error = %e, "Failed to record lifecycle marker");
        }

        self.save(user_id, Session::new()).await;
        tracing::info!(user_id, "Onboarding started");

        vec![
            OutgoingResponse::text(prompts::welcome(sender.display_name, &self.deps.flow)),
            OutgoingResponse::text(prompts::knowledge_question())
                .with_replies(prompts::KNOWLEDGE_OPTIONS),
        ]
    }

    async fn reset_flow(&self, user_id: &str) -> Vec<OutgoingResponse> {
        if let Err(e) = self.deps.sessions.clear(user_id).await {
            tracing::warn!(user_id, error = %e, "Failed to clear session");
        }
        tracing::info!(user_id, "Onboarding reset");
        vec![OutgoingResponse::text(prompts::reset_ack()).remove_keyboard()]
    }

    async fn text_flow(&self, user_id: &str, text: &str, sender: Sender<'_>) -> Vec<OutgoingResponse> {
        let session = match self.deps.sessions.get(user_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load session; starting over");
                None
            }
        };

        match session {
            Some(session) if !session.stage.is_terminal() => {
                self.advance(user_id, session, text).await
            }
            _ => self.start_flow(user_id, sender).await,
        }
    }

    /// Apply one answer to the session's current stage.
    async fn advance(&self, user_id: &str, mut session: Session, text: &str) -> Vec<OutgoingResponse> {
        let stage = session.stage;
        match stage {
            Stage::AwaitingKnowledgeAck => {
                let answer = text.to_lowercase();
                if answer != "yes" && answer != "no" {
                    return vec![
                        OutgoingResponse::text(prompts::knowledge_fallback())
                            .with_replies(prompts::KNOWLEDGE_OPTIONS),
                    ];
                }
                self.enter(user_id, &mut session, Stage::AwaitingPain).await;

                let mut replies = Vec::with_capacity(2);
                if answer == "no" {
                    replies.push(OutgoingResponse::text(prompts::explainer()));
                }
                replies.push(
                    OutgoingResponse::text(prompts::pain_question())
                        .with_replies(prompts::PAIN_OPTIONS),
                );
                replies
            }

            Stage::AwaitingPain => {
                if !is_substantive(text) {
                    return vec![
                        OutgoingResponse::text(prompts::pain_fallback())
                            .with_replies(prompts::PAIN_OPTIONS),
                    ];
                }
                session.collected.pain = Some(text.to_string());
                self.enter(user_id, &mut session, Stage::AwaitingEmail).await;
                vec![OutgoingResponse::text(prompts::email_question()).remove_keyboard()]
            }

            Stage::AwaitingEmail => {
                if !is_valid_email(text) {
                    return vec![OutgoingResponse::text(prompts::email_invalid()).remove_keyboard()];
                }
                let pain = session.collected.pain.clone().unwrap_or_default();
                session.collected.email = Some(text.to_string());

                let fields = ProfileFields::provisional(text, &pain, Utc::now());
                self.write_profile(user_id, &fields, "provisional").await;

                self.enter(user_id, &mut session, Stage::AwaitingSegment).await;
                vec![
                    OutgoingResponse::text(prompts::segment_question())
                        .with_replies(prompts::SEGMENT_OPTIONS),
                ]
            }

            Stage::AwaitingSegment => {
                if !is_substantive(text) {
                    return vec![
                        OutgoingResponse::text(prompts::segment_fallback())
                            .with_replies(prompts::SEGMENT_OPTIONS),
                    ];
                }
                let classification = self.deps.classifier.classify(text);
                let fields = ProfileFields {
                    email: session.collected.email.clone(),
                    pain: session.collected.pain.clone().unwrap_or_default(),
                    segment: text.to_string(),
                    is_business: classification.is_business,
                    answered_at: Utc::now(),
                };
                self.write_profile(user_id, &fields, "final").await;

                if let Err(e) = session.transition_to(Stage::Completed) {
                    tracing::warn!(user_id, error = %e, "Unexpected stage transition");
                }
                if let Err(e) = self.deps.sessions.clear(user_id).await {
                    // A stale AwaitingSegment must not take the next message as a new answer.
                    tracing::warn!(user_id, error = %e, "Failed to clear finished session");
                    self.save(user_id, session).await;
                }
                let track = segment_track(text);
                tracing::info!(
                    user_id,
                    is_business = classification.is_business,
                    track = ?track,
                    "Onboarding completed"
                );
                vec![
                    OutgoingResponse::text(prompts::closing(track, &self.deps.flow))
                        .remove_keyboard(),
                ]
            }

            Stage::Completed => self.start_flow(user_id, Sender::default()).await,
        }
    }

    /// Move the session to `target` and persist it.
    async fn enter(&self, user_id: &str, session: &mut Session, target: Stage) {
        if let Err(e) = session.transition_to(target) {
            tracing::warn!(user_id, error = %e, "Unexpected stage transition");
        }
        tracing::debug!(user_id, stage = %target, "Stage advanced");
        self.save(user_id, session.clone()).await;
    }

    async fn save(&self, user_id: &str, session: Session) {
        if let Err(e) = self.deps.sessions.put(user_id, session).await {
            tracing::warn!(user_id, error = %e, "Failed to save session");
        }
    }

    async fn write_profile(&self, user_id: &str, fields: &ProfileFields, kind: &str) {
        match self.deps.profiles.upsert_profile(user_id, fields).await {
            Ok(()) => tracing::debug!(user_id, kind, "Profile written"),
            Err(e) => tracing::warn!(
                user_id,
                kind,
                error = %e,
                "Profile write failed; continuing conversation"
            ),
        }
    }
}
