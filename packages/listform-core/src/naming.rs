//! Identifier-safe camel-case keys for remote column names.

use std::sync::LazyLock;

use regex::Regex;

/// `_xHHHH_` escape the list backend uses for characters that are not legal
/// in internal column names (`_x0020_` is a space).
static ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_x([0-9A-Fa-f]{4})_").expect("escape pattern is valid"));

/// Derives the key a column is exposed under.
///
/// Decodes `_xHHHH_` escapes, rewrites a trailing possessive `'s` to `s`,
/// then camel-cases over whitespace runs: the first character of the result
/// is lower-cased and the first character following each whitespace run is
/// upper-cased. Everything outside `[A-Za-z0-9]` is dropped.
#[must_use]
pub fn to_identifier(name: &str) -> String {
    let decoded = ESCAPE.replace_all(name, |caps: &regex::Captures<'_>| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    let trimmed = decoded.trim_end();
    let possessive_free = ["'s", "\u{2019}s"]
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .map_or_else(|| trimmed.to_string(), |stem| format!("{stem}s"));

    let mut out = String::with_capacity(possessive_free.len());
    for word in possessive_free.split_whitespace() {
        let mut chars = word.chars().filter(char::is_ascii_alphanumeric);
        let Some(first) = chars.next() else {
            continue;
        };
        if out.is_empty() {
            out.push(first.to_ascii_lowercase());
        } else {
            out.push(first.to_ascii_uppercase());
        }
        out.extend(chars);
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn camel_cases_words() {
        assert_eq!(to_identifier("Request Title"), "requestTitle");
        assert_eq!(to_identifier("  due   date "), "dueDate");
        assert_eq!(to_identifier("Title"), "title");
    }

    #[test]
    fn decodes_backend_escapes() {
        assert_eq!(to_identifier("Cost_x0020_Center"), "costCenter");
        assert_eq!(to_identifier("Manager_x0027_s"), "managers");
    }

    #[test]
    fn trailing_possessive() {
        assert_eq!(to_identifier("Manager's"), "managers");
        assert_eq!(to_identifier("Owner\u{2019}s"), "owners");
        assert_eq!(to_identifier("Approver's Name"), "approversName");
    }

    #[test]
    fn strips_punctuation_and_non_ascii() {
        assert_eq!(to_identifier("Amount ($)"), "amount");
        assert_eq!(to_identifier("% Complete"), "complete");
        assert_eq!(to_identifier("Caf\u{e9} Name"), "cafName");
        assert_eq!(to_identifier("---"), "");
    }

    proptest! {
        #[test]
        fn output_is_alphanumeric(input in ".{0,40}") {
            let out = to_identifier(&input);
            prop_assert!(out.chars().all(|c| c.is_ascii_alphanumeric()));
        }

        #[test]
        fn transform_is_deterministic(input in ".{0,40}") {
            prop_assert_eq!(to_identifier(&input), to_identifier(&input));
        }
    }
}
