//! Onboarding state machine: which stage each user is in.

use serde::{Deserialize, Serialize};

/// The stages of the onboarding conversation.
///
/// Progresses linearly: AwaitingKnowledgeAck → AwaitingPain → AwaitingEmail →
/// AwaitingSegment → Completed. A user with no session has not started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingKnowledgeAck,
    AwaitingPain,
    AwaitingEmail,
    AwaitingSegment,
    Completed,
}

impl Stage {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Staying in place (re-prompt) is always valid, and `Completed` may
    /// restart the flow.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        *self == target
            || matches!(
                (self, target),
                (AwaitingKnowledgeAck, AwaitingPain)
                    | (AwaitingPain, AwaitingEmail)
                    | (AwaitingEmail, AwaitingSegment)
                    | (AwaitingSegment, Completed)
                    | (Completed, AwaitingKnowledgeAck)
            )
    }

    /// Whether this stage ends the flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingKnowledgeAck => "awaiting_knowledge_ack",
            Self::AwaitingPain => "awaiting_pain",
            Self::AwaitingEmail => "awaiting_email",
            Self::AwaitingSegment => "awaiting_segment",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Answers collected so far in the current flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collected {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Per-user conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub stage: Stage,
    #[serde(default)]
    pub collected: Collected,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session waiting for the knowledge answer.
    pub fn new() -> Self {
        Self {
            stage: Stage::AwaitingKnowledgeAck,
            collected: Collected::default(),
        }
    }

    /// Move to `target`. Returns an error for transitions the flow never makes.
    pub fn transition_to(&mut self, target: Stage) -> Result<(), String> {
        if !self.stage.can_transition_to(target) {
            return Err(format!("Cannot transition from {} to {}", self.stage, target));
        }
        self.stage = target;
        Ok(())
    }
}
