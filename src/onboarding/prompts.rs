//! Fixed texts and quick-reply sets for the onboarding conversation.
//!
//! Texts use the rich-text subset from [`crate::channels::rich_text`]. Anything
//! user-supplied is escaped before it is embedded.

use crate::channels::rich_text::escape;
use crate::config::FlowConfig;

use super::validate::SegmentTrack;

/// Quick-reply label that starts (or restarts) the diagnostic.
pub const START_DIAGNOSTIC: &str = "Start Diagnostic";

pub const KNOWLEDGE_OPTIONS: [&str; 2] = ["Yes", "No"];

pub const PAIN_OPTIONS: [&str; 6] = [
    "Be more productive",
    "Automate routine",
    "Stay focused & organized",
    "Build my \"second brain\"",
    "Improve business ops",
    "Type my own reason",
];

pub const SEGMENT_OPTIONS: [&str; 4] = [
    "Individual",
    "Small business (1–20)",
    "Mid/Large company (20+)",
    "Or type your own",
];

/// First message after a start signal.
pub fn welcome(display_name: Option<&str>, flow: &FlowConfig) -> String {
    let name = display_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(escape)
        .unwrap_or_else(|| "there".to_string());
    format!(
        "👋 Hey, {name}!\n\n\
         Welcome to <b>LifeOS</b>, your personal AI Operator.\n\
         I'll help you build your system of focus, automation, and growth.\n\n\
         👉 Join the community: {channel}\n\
         💬 Or talk to your manager: {manager}",
        channel = escape(&flow.channel_url),
        manager = escape(&flow.manager_username),
    )
}

pub fn knowledge_question() -> &'static str {
    "Before we start: do you already know what <b>LifeOS</b> is?"
}

pub fn knowledge_fallback() -> &'static str {
    "Please answer <b>Yes</b> or <b>No</b> using the buttons below."
}

/// Sent before the pain question when the user answered "No".
pub fn explainer() -> &'static str {
    "<b>LifeOS</b> is an AI operating system for your life and work.\n\n\
     It keeps your goals, tasks and notes in one place, automates the routine \
     and helps you stay focused on what matters."
}

pub fn pain_question() -> &'static str {
    "What do you want LifeOS to help you with most? \
     Pick an option or <i>type your own reason</i>."
}

pub fn pain_fallback() -> &'static str {
    "Tell me a little more: pick one of the options or type your reason in a few words."
}

pub fn email_question() -> &'static str {
    "Great! What's your <b>email</b>? We'll send your personal setup there."
}

pub fn email_invalid() -> &'static str {
    "Hmm, that doesn't look like an email. Please send something like <i>name@example.com</i>."
}

pub fn segment_question() -> &'static str {
    "Last question: who are you setting LifeOS up for?"
}

pub fn segment_fallback() -> &'static str {
    "Please pick one of the options or describe yourself in a few words."
}

/// Closing message for a finished user.
pub fn closing(track: SegmentTrack, flow: &FlowConfig) -> String {
    let body = match track {
        SegmentTrack::Individual => {
            "✅ You're all set! We'll tailor LifeOS to your <b>personal workflow</b>: \
             habits, focus and a second brain that works for you."
        }
        SegmentTrack::Business => {
            "✅ You're all set! We'll prepare a <b>LifeOS setup for your business</b>: \
             team routines, automation and clear operations."
        }
        SegmentTrack::Tailored => {
            "✅ Thanks! We'll put together a <b>tailored LifeOS setup</b> based on your answers."
        }
    };
    format!(
        "{body}\n\n\
         👉 Join the community: {channel}\n\
         💬 Questions? Talk to your manager: {manager}",
        channel = escape(&flow.channel_url),
        manager = escape(&flow.manager_username),
    )
}

pub fn reset_ack() -> &'static str {
    "Your onboarding has been reset. Send /start whenever you want to begin again."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::rich_text::to_plain_text;

    #[test]
    fn welcome_uses_name_or_fallback() {
        let flow = FlowConfig::default();
        assert!(welcome(Some("Ada"), &flow).starts_with("👋 Hey, Ada!"));
        assert!(welcome(None, &flow).starts_with("👋 Hey, there!"));
        assert!(welcome(Some("  "), &flow).starts_with("👋 Hey, there!"));
    }

    #[test]
    fn welcome_escapes_display_name() {
        let text = welcome(Some("<b>Eve</b>"), &FlowConfig::default());
        assert!(text.contains("&lt;b&gt;Eve&lt;/b&gt;"));
        assert!(to_plain_text(&text).contains("Hey, <b>Eve</b>!"));
    }

    #[test]
    fn welcome_and_closings_carry_links() {
        let flow = FlowConfig {
            channel_url: "https://t.me/example".into(),
            manager_username: "@manager".into(),
        };
        let mut texts = vec![welcome(Some("Ada"), &flow)];
        for track in [
            SegmentTrack::Individual,
            SegmentTrack::Business,
            SegmentTrack::Tailored,
        ] {
            texts.push(closing(track, &flow));
        }
        for text in texts {
            assert!(text.contains("https://t.me/example"), "{text}");
            assert!(text.contains("@manager"), "{text}");
        }
    }

    #[test]
    fn closings_differ_per_track() {
        let flow = FlowConfig::default();
        let individual = closing(SegmentTrack::Individual, &flow);
        let business = closing(SegmentTrack::Business, &flow);
        let tailored = closing(SegmentTrack::Tailored, &flow);
        assert!(individual.contains("personal workflow"));
        assert!(business.contains("for your business"));
        assert!(tailored.contains("tailored"));
        assert_ne!(individual, business);
        assert_ne!(business, tailored);
    }

    #[test]
    fn keyboards_match_expected_options() {
        assert_eq!(KNOWLEDGE_OPTIONS, ["Yes", "No"]);
        assert_eq!(PAIN_OPTIONS.len(), 6);
        assert_eq!(PAIN_OPTIONS[3], "Build my \"second brain\"");
        assert_eq!(SEGMENT_OPTIONS[1], "Small business (1–20)");
    }

    #[test]
    fn fixed_texts_degrade_cleanly() {
        for text in [
            knowledge_question(),
            explainer(),
            pain_question(),
            email_question(),
            email_invalid(),
            segment_question(),
        ] {
            let plain = to_plain_text(text);
            assert!(!plain.contains('<') && !plain.contains('>'), "{plain}");
        }
    }
}
