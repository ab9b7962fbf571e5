//! Answer validation and keyword heuristics.
//!
//! Everything here is pure: no transport, no store.

use std::sync::LazyLock;

use regex::Regex;

/// One local part, one `@`, a domain containing a dot, no whitespace anywhere.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
});

/// Check that `text` looks like an email address.
///
/// Surrounding whitespace is ignored; embedded whitespace is not.
pub fn is_valid_email(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && EMAIL_RE.is_match(text)
}

/// Coarse business-vs-individual classification of a segment answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_business: bool,
}

/// Strategy that maps a free-text segment answer to a classification.
pub trait SegmentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;
}

impl<F> SegmentClassifier for F
where
    F: Fn(&str) -> Classification + Send + Sync,
{
    fn classify(&self, text: &str) -> Classification {
        self(text)
    }
}

/// The default keyword heuristic, see [`classify_segment`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl SegmentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Classification {
        classify_segment(text)
    }
}

/// Individual iff the text is exactly "individual" or mentions "freelancer"
/// or "solo" (case-insensitive). Anything else counts as business, including
/// answers like "retired".
pub fn classify_segment(text: &str) -> Classification {
    let normalized = text.trim().to_lowercase();
    let individual = normalized == "individual"
        || normalized.contains("freelancer")
        || normalized.contains("solo");
    Classification {
        is_business: !individual,
    }
}

/// Which closing message a finished user receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentTrack {
    Individual,
    Business,
    Tailored,
}

/// Substrings that select the business track, checked in this order.
const BUSINESS_MARKERS: [&str; 4] = ["small business", "mid/large company", "company", "business"];

/// Pick the closing track: exact "individual" first, then the business
/// substrings, then the generic fallback.
pub fn segment_track(text: &str) -> SegmentTrack {
    let normalized = text.trim().to_lowercase();
    if normalized == "individual" {
        SegmentTrack::Individual
    } else if BUSINESS_MARKERS.iter().any(|m| normalized.contains(m)) {
        SegmentTrack::Business
    } else {
        SegmentTrack::Tailored
    }
}

/// Whether a free-text answer is long enough to accept (more than one character).
pub fn is_substantive(text: &str) -> bool {
    text.trim().chars().count() > 1
}
