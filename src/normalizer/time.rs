//! Display-time parsing. Facebook renders post times in many shapes
//! ("5 mins", "Yesterday at 5:00 PM", "Monday, March 4, 2024 at 3:15 PM",
//! "4 March 2024 15:15"), all resolved here against a fixed reference time.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

/// Format used when a display string has to be rendered from an epoch
pub const DISPLAY_FORMAT: &str = "%A, %B %-d, %Y at %-I:%M %p";

const WEEKDAYS: [&str; 14] = [
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "mon", "tue",
    "wed", "thu", "fri", "sat", "sun",
];

const DATETIME_FORMATS: [&str; 6] = [
    "%B %d %Y %I:%M %p",
    "%B %d %Y %I:%M%p",
    "%B %d %Y %H:%M",
    "%d %B %Y %I:%M %p",
    "%d %B %Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 3] = ["%B %d %Y", "%d %B %Y", "%Y-%m-%d"];

const CLOCK_FORMATS: [&str; 3] = ["%I:%M %p", "%I:%M%p", "%H:%M"];

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+)\s*(s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?|d|days?|w|wks?|weeks?|y|yrs?|years?)(?:\s+ago)?$",
    )
    .expect("relative time pattern is valid")
});

static ARTICLE_RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^an?\s+(minute|hour|day|week|year)\s+ago$").expect("relative time pattern is valid")
});

static DAY_RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(yesterday|today)(?:\s+at)?(?:\s+(.+))?$").expect("day pattern is valid")
});

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\b").expect("year pattern is valid"));

/// Render an instant as Facebook displays it
pub fn render_display_time(at: DateTime<Utc>) -> String {
    at.format(DISPLAY_FORMAT).to_string()
}

/// Parse a display time. Naive times are taken as UTC. Returns `None` for
/// text that is not a recognizable time.
pub fn parse_display_time(text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed.with_timezone(&Utc));
    }

    let lower = text.to_lowercase();
    if let Some(at) = parse_relative(&lower, reference) {
        return Some(at);
    }

    parse_absolute(&lower, reference)
}

fn unit_duration(unit: &str, amount: i64) -> Option<Duration> {
    if !(0..=100_000).contains(&amount) {
        return None;
    }
    let duration = match unit.chars().next()? {
        's' => Duration::seconds(amount),
        'm' => Duration::minutes(amount),
        'h' => Duration::hours(amount),
        'd' => Duration::days(amount),
        'w' => Duration::weeks(amount),
        'y' => Duration::days(365 * amount),
        _ => return None,
    };
    Some(duration)
}

fn parse_relative(text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if matches!(text, "just now" | "now") {
        return Some(reference);
    }

    if let Some(caps) = RELATIVE_RE.captures(text) {
        let amount: i64 = caps[1].parse().ok()?;
        return reference.checked_sub_signed(unit_duration(&caps[2], amount)?);
    }

    if let Some(caps) = ARTICLE_RELATIVE_RE.captures(text) {
        return reference.checked_sub_signed(unit_duration(&caps[1], 1)?);
    }

    let caps = DAY_RELATIVE_RE.captures(text)?;
    let day = if &caps[1] == "yesterday" {
        reference.date_naive().pred_opt()?
    } else {
        reference.date_naive()
    };
    match caps.get(2) {
        Some(clock) => {
            let time = parse_clock(clock.as_str())?;
            Some(Utc.from_utc_datetime(&day.and_time(time)))
        }
        None => Some(Utc.from_utc_datetime(&day.and_time(reference.time()))),
    }
}

fn parse_clock(text: &str) -> Option<NaiveTime> {
    CLOCK_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text.trim(), format).ok())
}

fn strip_weekday(text: &str) -> &str {
    for weekday in WEEKDAYS {
        if let Some(rest) = text.strip_prefix(weekday) {
            if rest.starts_with([',', ' ']) {
                return rest.trim_start_matches([',', ' ']);
            }
        }
    }
    text
}

fn parse_absolute(text: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cleaned = strip_weekday(text).replace(" at ", " ").replace(',', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if YEAR_RE.is_match(&cleaned) {
        return parse_with_year(&cleaned);
    }

    // Dates of the current year are shown without one. The most recent
    // year placing the date in the past wins; February 29 may need to go
    // back to the last leap year.
    (0..=YEAR_LOOKBACK)
        .map(|back| reference.year() - back)
        .filter_map(|year| parse_with_year(&insert_year(&cleaned, year)))
        .find(|candidate| *candidate <= reference)
}

/// Years searched back for a date shown without a year
const YEAR_LOOKBACK: i32 = 4;

/// Insert a year after the leading "month day" or "day month" pair
fn insert_year(text: &str, year: i32) -> String {
    let mut parts: Vec<String> = text.split(' ').map(str::to_string).collect();
    let at = parts.len().min(2);
    parts.insert(at, year.to_string());
    parts.join(" ")
}

fn parse_with_year(text: &str) -> Option<DateTime<Utc>> {
    let datetime = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    Some(Utc.from_utc_datetime(&datetime))
}
