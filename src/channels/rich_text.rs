//! Restricted rich-text subset used in outgoing messages.
//!
//! Supported tags: `<b>`, `<i>`, `<u>` and `<a href="…">`. Literal `<`, `>`
//! and `&` must be written as entities. Transports that cannot render the
//! tags fall back to [`to_plain_text`].

use std::sync::LazyLock;

use regex::Regex;

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("href regex is valid")
});

/// Escape user-provided text for embedding in rich text.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Degrade rich text to plain text.
///
/// Tags are stripped (unsupported ones too), anchors render as
/// `text (url)` unless the text already is the url, entities are unescaped.
pub fn to_plain_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut anchors: Vec<(usize, String)> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        out.push_str(&unescape(&rest[..open]));
        let after = &rest[open..];
        let Some(close) = after.find('>') else {
            out.push_str(&unescape(after));
            rest = "";
            break;
        };
        let tag = after[1..close].trim();
        rest = &after[close + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            if name.trim().eq_ignore_ascii_case("a")
                && let Some((start, href)) = anchors.pop()
                && !href.is_empty()
                && out[start..].trim() != href
            {
                out.push_str(&format!(" ({href})"));
            }
            continue;
        }

        let name = tag.split_whitespace().next().unwrap_or_default();
        if name.eq_ignore_ascii_case("a") {
            let href = HREF_RE
                .captures(tag)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| unescape(m.as_str()))
                .unwrap_or_default();
            anchors.push((out.len(), href));
        }
    }
    out.push_str(&unescape(rest));
    out
}
