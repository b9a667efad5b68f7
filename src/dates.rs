//! Date utilities for member birthdays.
//!
//! The directory backend returns birthdays in varied shapes: ISO dates
//! (`2024-03-05`), full timestamps, strings already formatted for display
//! (`05/03/2024`), or nothing at all. [`normalize_date`] turns any of those
//! into a [`CanonicalDate`], and [`format_date`] renders it as `dd/mm/yyyy`
//! (or `dd/mm` when the year is omitted).
//!
//! Neither function fails: absent or unparseable input becomes
//! [`CanonicalDate::Invalid`] and renders as [`PLACEHOLDER`].

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Rendered in place of an absent or invalid date, regardless of `omit_year`.
pub const PLACEHOLDER: &str = "--/--/----";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("invalid ISO date regex"));

static DISPLAY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2})/(\d{2})/(\d{4})$").expect("invalid display date regex")
});

/// Date-only values are pinned to midday so a timezone shift never moves them
/// to a neighbouring day.
fn midday() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// A raw date as it arrives from the backend or from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawDate {
    Absent,
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl RawDate {
    /// Interpret a JSON field. Only strings carry a date; `null`, `false`
    /// and every other shape are treated as absent.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => RawDate::Text(s.clone()),
            _ => RawDate::Absent,
        }
    }
}

impl From<&str> for RawDate {
    fn from(s: &str) -> Self {
        RawDate::Text(s.to_string())
    }
}

impl From<String> for RawDate {
    fn from(s: String) -> Self {
        RawDate::Text(s)
    }
}

impl<T: Into<RawDate>> From<Option<T>> for RawDate {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawDate::Absent)
    }
}

impl From<NaiveDate> for RawDate {
    fn from(date: NaiveDate) -> Self {
        RawDate::Date(date)
    }
}

impl From<NaiveDateTime> for RawDate {
    fn from(dt: NaiveDateTime) -> Self {
        RawDate::DateTime(dt)
    }
}

/// Either a real calendar date-time or the explicit invalid/absent marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalDate {
    Valid(NaiveDateTime),
    Invalid,
}

impl CanonicalDate {
    /// Midday on the given calendar day, or `Invalid` if the day does not exist.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Self {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|d| CanonicalDate::Valid(d.and_time(midday())))
            .unwrap_or(CanonicalDate::Invalid)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, CanonicalDate::Valid(_))
    }
}

/// Parse a raw date into a [`CanonicalDate`]. Never fails.
pub fn normalize_date(raw: impl Into<RawDate>) -> CanonicalDate {
    match raw.into() {
        RawDate::Absent => CanonicalDate::Invalid,
        RawDate::Date(date) => CanonicalDate::Valid(date.and_time(midday())),
        RawDate::DateTime(dt) => CanonicalDate::Valid(dt),
        RawDate::Text(text) => parse_text(text.trim()),
    }
}

fn parse_text(text: &str) -> CanonicalDate {
    if text.is_empty() {
        return CanonicalDate::Invalid;
    }

    if let Some(caps) = ISO_DATE.captures(text) {
        return from_captures(&caps[1], &caps[2], &caps[3]);
    }

    if let Some(caps) = DISPLAY_DATE.captures(text) {
        return from_captures(&caps[3], &caps[2], &caps[1]);
    }

    // Timestamps keep the wall-clock time they were written with.
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return CanonicalDate::Valid(dt.naive_local());
    }

    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, pattern) {
            return CanonicalDate::Valid(dt);
        }
    }

    CanonicalDate::Invalid
}

fn from_captures(year: &str, month: &str, day: &str) -> CanonicalDate {
    match (year.parse(), month.parse(), day.parse()) {
        (Ok(y), Ok(m), Ok(d)) => CanonicalDate::from_ymd(y, m, d),
        _ => CanonicalDate::Invalid,
    }
}

/// Input accepted by [`format_date`]: an already-normalized date, or a string
/// that may already be in a known textual shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
    Canonical(CanonicalDate),
    Text(String),
}

impl From<CanonicalDate> for DateInput {
    fn from(date: CanonicalDate) -> Self {
        DateInput::Canonical(date)
    }
}

impl From<&str> for DateInput {
    fn from(s: &str) -> Self {
        DateInput::Text(s.to_string())
    }
}

impl From<String> for DateInput {
    fn from(s: String) -> Self {
        DateInput::Text(s)
    }
}

impl From<NaiveDate> for DateInput {
    fn from(date: NaiveDate) -> Self {
        DateInput::Canonical(normalize_date(date))
    }
}

impl From<NaiveDateTime> for DateInput {
    fn from(dt: NaiveDateTime) -> Self {
        DateInput::Canonical(CanonicalDate::Valid(dt))
    }
}

/// Render a date as `dd/mm/yyyy`, or `dd/mm` when `omit_year` is set.
///
/// - Absent/invalid input yields [`PLACEHOLDER`], never shortened.
/// - `yyyy-mm-dd` strings are reordered field by field, without validation.
/// - `dd/mm/yyyy` strings are returned verbatim, ignoring `omit_year`.
/// - Any other string is normalized first.
pub fn format_date(input: impl Into<DateInput>, omit_year: bool) -> String {
    match input.into() {
        DateInput::Canonical(date) => format_canonical(date, omit_year),
        DateInput::Text(text) => {
            if text.is_empty() {
                return PLACEHOLDER.to_string();
            }
            if let Some(caps) = ISO_DATE.captures(&text) {
                return format!("{}/{}/{}", &caps[3], &caps[2], &caps[1]);
            }
            if DISPLAY_DATE.is_match(&text) {
                return text;
            }
            format_canonical(normalize_date(text), omit_year)
        }
    }
}

fn format_canonical(date: CanonicalDate, omit_year: bool) -> String {
    // Years that do not fit four digits cannot keep the fixed width.
    let dt = match date {
        CanonicalDate::Valid(dt) if (0..=9999).contains(&dt.year()) => dt,
        _ => return PLACEHOLDER.to_string(),
    };

    if omit_year {
        format!("{:02}/{:02}", dt.day(), dt.month())
    } else {
        format!("{:02}/{:02}/{:04}", dt.day(), dt.month(), dt.year())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn absent_inputs_render_placeholder() {
        let absent = [
            RawDate::Absent,
            RawDate::from(""),
            RawDate::from(None::<&str>),
            RawDate::from_json(&json!(null)),
            RawDate::from_json(&json!(false)),
        ];

        for raw in absent {
            let date = normalize_date(raw.clone());
            assert_eq!(date, CanonicalDate::Invalid, "{raw:?}");
            assert_eq!(format_date(date, false), PLACEHOLDER);
            assert_eq!(format_date(date, true), PLACEHOLDER);
        }
    }

    #[test]
    fn iso_date_is_pinned_to_midday() {
        let date = normalize_date("2024-03-05");
        assert_eq!(
            date,
            CanonicalDate::Valid(ymd(2024, 3, 5).and_hms_opt(12, 0, 0).unwrap())
        );
    }

    #[test]
    fn impossible_calendar_day_is_invalid() {
        assert_eq!(normalize_date("2024-02-30"), CanonicalDate::Invalid);
        assert_eq!(normalize_date("2023-13-01"), CanonicalDate::Invalid);
    }

    #[test]
    fn garbage_is_invalid_not_a_panic() {
        assert_eq!(normalize_date("not a date"), CanonicalDate::Invalid);
        assert_eq!(normalize_date("2024/03/05"), CanonicalDate::Invalid);
        assert_eq!(normalize_date(RawDate::from_json(&json!(19990101))), CanonicalDate::Invalid);
    }

    #[test]
    fn display_shaped_string_normalizes() {
        assert_eq!(normalize_date("05/03/2024"), CanonicalDate::from_ymd(2024, 3, 5));
    }

    #[test]
    fn timestamps_keep_their_written_day() {
        let date = normalize_date("2024-03-05T23:30:00-03:00");
        assert_eq!(format_date(date, false), "05/03/2024");

        let date = normalize_date("2024-03-05T08:15:00");
        assert_eq!(format_date(date, true), "05/03");
    }

    #[test]
    fn native_values_pass_through() {
        assert_eq!(normalize_date(ymd(1990, 12, 1)), CanonicalDate::from_ymd(1990, 12, 1));

        let dt = ymd(1990, 12, 1).and_hms_opt(3, 0, 0).unwrap();
        assert_eq!(normalize_date(dt), CanonicalDate::Valid(dt));
    }

    #[test]
    fn iso_string_is_reordered() {
        assert_eq!(format_date("2024-03-05", false), "05/03/2024");
    }

    #[test]
    fn iso_string_reorder_does_not_validate() {
        assert_eq!(format_date("2024-02-30", false), "30/02/2024");
    }

    #[test]
    fn display_string_is_idempotent_and_keeps_year() {
        assert_eq!(format_date("05/03/2024", false), "05/03/2024");
        assert_eq!(format_date("05/03/2024", true), "05/03/2024");
    }

    #[test]
    fn canonical_date_honours_omit_year() {
        let date = CanonicalDate::from_ymd(2024, 3, 5);
        assert_eq!(format_date(date, true), "05/03");
        assert_eq!(format_date(date, false), "05/03/2024");
    }

    #[test]
    fn other_strings_are_normalized_before_formatting() {
        assert_eq!(format_date("2024-03-05T10:00:00Z", true), "05/03");
        assert_eq!(format_date("tomorrow", false), PLACEHOLDER);
        assert_eq!(format_date("tomorrow", true), PLACEHOLDER);
    }

    #[test]
    fn early_years_are_zero_padded() {
        let date = normalize_date("0999-03-05");
        assert_eq!(format_date(date, false), "05/03/0999");
        assert_eq!(format_date(date, false), format_date("0999-03-05", false));
        assert_eq!(format_date(ymd(5, 1, 2), false), "02/01/0005");
    }

    #[test]
    fn years_beyond_four_digits_render_placeholder() {
        assert_eq!(format_date(ymd(12345, 1, 2), false), PLACEHOLDER);
        assert_eq!(format_date(ymd(12345, 1, 2), true), PLACEHOLDER);
        assert_eq!(format_date(ymd(-44, 3, 15), false), PLACEHOLDER);
    }

    #[test]
    fn normalize_then_format_round_trips_display_form() {
        let date = normalize_date(RawDate::from_json(&json!("1987-11-09")));
        assert_eq!(format_date(date, false), "09/11/1987");
        assert_eq!(format_date(date, true), "09/11");
    }
}
