//! Multi-format date parsing.
//!
//! Wire and user input arrive in several shapes. Recognized, in priority
//! order:
//!
//! 1. `M/D/YYYY` (slash-delimited, optional trailing time ignored)
//! 2. `M-D-YYYY` (hyphen-delimited, optional trailing time ignored)
//! 3. `YYYY-MM-DD`
//! 4. ISO datetime with trailing `Z`, e.g. `2024-03-05T10:00:00Z`
//! 5. zone-less datetime, `2024-03-05 10:00:00` or `2024-03-05T10:00:00`,
//!    read as UTC (the legacy backend writes this shape)
//! 6. legacy `/Date(1709596800000)/`
//!
//! Two-digit years add 2000. Anything else yields `None`.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

static MONTH_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})([/-])(\d{1,2})([/-])(\d{2}|\d{4})(?:\s.*)?$")
        .expect("month-first pattern is valid")
});

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("iso date pattern is valid")
});

static ISO_DATETIME_Z: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?Z$")
        .expect("iso datetime pattern is valid")
});

static LOCAL_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?$")
        .expect("local datetime pattern is valid")
});

static LEGACY_EPOCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/Date\((-?\d+)(?:[+-]\d{4})?\)/$").expect("legacy epoch pattern is valid")
});

/// Parses `input` into a UTC instant. Date-only forms resolve to midnight UTC.
#[must_use]
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(caps) = MONTH_FIRST.captures(input) {
        // Mixed delimiters such as `3/5-2024` are not a recognized form.
        if caps[2] == caps[4] {
            let month = caps[1].parse().ok()?;
            let day = caps[3].parse().ok()?;
            let year = normalize_year(caps[5].parse().ok()?);
            return midnight(year, month, day);
        }
        return None;
    }

    if let Some(caps) = ISO_DATE.captures(input) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return midnight(year, month, day);
    }

    if ISO_DATETIME_Z.is_match(input) {
        let body = input.trim_end_matches('Z');
        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(body, fmt).ok())?;
        return Some(naive.and_utc());
    }

    if LOCAL_DATETIME.is_match(input) {
        let body = input.replacen(' ', "T", 1);
        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&body, fmt).ok())?;
        return Some(naive.and_utc());
    }

    if let Some(caps) = LEGACY_EPOCH.captures(input) {
        let millis: i64 = caps[1].parse().ok()?;
        return DateTime::from_timestamp_millis(millis);
    }

    None
}

/// Parses and reduces to a calendar date.
#[must_use]
pub fn parse_day(input: &str) -> Option<NaiveDate> {
    parse_date(input).map(|dt| dt.date_naive())
}

fn normalize_year(year: i32) -> i32 {
    if year < 100 {
        year + 2000
    } else {
        year
    }
}

fn midnight(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn march_fifth() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
    }

    #[test]
    fn all_recognized_forms_agree_on_the_same_day() {
        let inputs = [
            "3/5/2024",
            "3-5-2024",
            "2024-03-05",
            "2024-03-05T00:00:00Z",
            "/Date(1709596800000)/",
        ];
        for input in inputs {
            assert_eq!(parse_date(input), Some(march_fifth()), "{input}");
        }
    }

    #[test]
    fn zone_less_datetime_keeps_time() {
        let ten = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(parse_date("2024-03-05 10:00:00"), Some(ten));
        assert_eq!(parse_date("2024-03-05T10:00:00"), Some(ten));
        assert_eq!(parse_date("2024-03-05 10:00"), Some(ten));
        assert_eq!(parse_date("2024-03-05 25:00:00"), None);
    }

    #[test]
    fn two_digit_years_add_2000() {
        assert_eq!(parse_date("03/05/24"), Some(march_fifth()));
        assert_eq!(parse_date("3-5-24"), Some(march_fifth()));
    }

    #[test]
    fn trailing_time_on_slash_form_is_ignored() {
        assert_eq!(parse_date("3/5/2024 4:15 PM"), Some(march_fifth()));
    }

    #[test]
    fn iso_datetime_keeps_time_and_fraction() {
        let parsed = parse_date("2024-03-05T10:20:30.250Z").unwrap();
        assert_eq!(parsed.timestamp_millis(), march_fifth().timestamp_millis() + 37_230_250);
    }

    #[test]
    fn legacy_offset_suffix_is_accepted() {
        assert_eq!(parse_date("/Date(1709596800000+0100)/"), Some(march_fifth()));
    }

    #[test]
    fn invalid_inputs_yield_none() {
        for input in ["", "   ", "not a date", "13/45/2024", "2024-02-30", "3/5-2024", "2024-03-05T10:00:00"] {
            assert_eq!(parse_date(input), None, "{input}");
        }
    }

    #[test]
    fn parse_day_truncates_time() {
        assert_eq!(
            parse_day("2024-03-05T23:59:59Z"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
    }
}
