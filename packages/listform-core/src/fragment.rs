//! URL fragment codec for the persisted record identity (`#/id/<N>`).

const PREFIX: &str = "#/id/";

/// Extracts the record id from a fragment such as `#/id/42`.
///
/// The leading `#` is optional and a trailing slash or query is ignored.
#[must_use]
pub fn parse_fragment(fragment: &str) -> Option<u64> {
    let trimmed = fragment.trim();
    let rest = trimmed
        .strip_prefix(PREFIX)
        .or_else(|| trimmed.strip_prefix(&PREFIX[1..]))?;
    let digits = rest.split(['/', '?', '&']).next()?;
    digits.parse().ok().filter(|id| *id > 0)
}

/// Formats the fragment for `id`.
#[must_use]
pub fn format_fragment(id: u64) -> String {
    format!("{PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fragments() {
        assert_eq!(parse_fragment("#/id/42"), Some(42));
        assert_eq!(parse_fragment("/id/7/"), Some(7));
        assert_eq!(parse_fragment("#/id/9?tab=history"), Some(9));
        assert_eq!(parse_fragment("#/id/"), None);
        assert_eq!(parse_fragment("#/id/0"), None);
        assert_eq!(parse_fragment("#/new"), None);
        assert_eq!(parse_fragment(""), None);
    }

    #[test]
    fn format_then_parse() {
        assert_eq!(format_fragment(42), "#/id/42");
        assert_eq!(parse_fragment(&format_fragment(42)), Some(42));
    }
}
