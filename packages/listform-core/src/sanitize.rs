//! Rich-text sanitizer for multiline note fields.
//!
//! Keeps a small formatting subset of HTML. Everything else is stripped:
//! disallowed tags are removed (their text content kept), `script`/`style`
//! blocks and comments are removed entirely, and only `href` survives as an
//! attribute, on `<a>`, when it uses `http`, `https` or `mailto`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Tags allowed through the sanitizer.
pub const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "br", "div", "em", "i", "li", "ol", "p", "span", "strong", "u", "ul",
];

static DANGEROUS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|object|embed)\b[^>]*>.*?</(script|style|iframe|object|embed)\s*>")
        .expect("dangerous block pattern is valid")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)([^>]*)>").expect("tag pattern is valid")
});

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("href pattern is valid")
});

/// Sanitizes user HTML down to the allowed subset.
#[must_use]
pub fn sanitize_html(input: &str) -> String {
    let without_blocks = DANGEROUS_BLOCK.replace_all(input, "");
    let cleaned = COMMENT.replace_all(&without_blocks, "");

    let mut out = String::with_capacity(cleaned.len());
    let mut last = 0;
    for caps in TAG.captures_iter(&cleaned) {
        let whole = caps.get(0).expect("group 0 always participates");
        escape_text(&cleaned[last..whole.start()], &mut out);
        out.push_str(&rebuild_tag(&caps));
        last = whole.end();
    }
    escape_text(&cleaned[last..], &mut out);
    out
}

/// Text between tags: stray angle brackets are escaped.
fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn rebuild_tag(caps: &Captures<'_>) -> String {
    let closing = !caps[1].is_empty();
    let name = caps[2].to_ascii_lowercase();
    if !ALLOWED_TAGS.contains(&name.as_str()) {
        return String::new();
    }
    if closing {
        return format!("</{name}>");
    }
    if name == "a" {
        return match safe_href(&caps[3]) {
            Some(href) => format!("<a href=\"{href}\">"),
            None => "<a>".to_string(),
        };
    }
    if caps[3].trim_end().ends_with('/') {
        format!("<{name} />")
    } else {
        format!("<{name}>")
    }
}

fn safe_href(attrs: &str) -> Option<String> {
    let caps = HREF.captures(attrs)?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str()
        .trim();
    let lower = value.to_ascii_lowercase();
    let allowed = ["http://", "https://", "mailto:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme));
    allowed.then(|| value.replace('"', "&quot;"))
}
