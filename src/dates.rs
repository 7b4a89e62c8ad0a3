//! Publication date normalization.
//!
//! Listing pages, article pages and feeds state publication dates in many
//! shapes: RSS `pubDate` mail dates, ISO-8601 timestamps with or without a
//! zone, "Friday 28 November 2025", "28 Nov 2025", "November 2025", or bare
//! epoch numbers. [`normalize`] reduces all of them to a calendar date, or to
//! [`NormalizedDate::Unknown`] when nothing matches. It never fails.
//!
//! # Format priority
//!
//! 1. Bare epoch seconds or milliseconds (plausible years only)
//! 2. Structured feed formats: RFC 2822, RFC 3339, other ISO-8601 shapes
//! 3. Day-month-year with a month name, after stripping a weekday prefix
//! 4. Month-year only, with the day defaulted to 1

use crate::utils::collapse_whitespace;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 3_600_000_000;

/// Epoch results outside this year range are implausible and become unknown.
const EPOCH_YEARS: std::ops::RangeInclusive<i32> = 1990..=2100;

const MONTHS: &str = r"(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)";

static WEEKDAY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tues?|wed|thu(?:rs?)?|fri|sat|sun)\.?,?\s+",
    )
    .unwrap()
});

static PUBLISHED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^published(?:\s+(?:date|on))?\s*:?\s*").unwrap());

/// chrono's `%b` reads exactly three letters, so "Sept" needs shortening.
static SEPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsept\b").unwrap());

static DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\b\d{{1,2}}\s+{MONTHS}\.?\s+\d{{4}}\b")).unwrap());

static MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\b{MONTHS}\s+\d{{4}}\b")).unwrap());

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DAY_MONTH_YEAR_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y"];

/// Text forms with a two-digit or shorter year are rejected.
const MIN_TEXT_YEAR: i32 = 1000;

/// A publication date reduced to a calendar value, or the unknown sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizedDate {
    Known(NaiveDate),
    Unknown,
}

impl NormalizedDate {
    pub fn is_known(&self) -> bool {
        matches!(self, NormalizedDate::Known(_))
    }

    /// Ordering for display: newest first, unknown dates last.
    ///
    /// Equal dates compare equal, so a stable sort keeps discovery order among ties.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        match (a, b) {
            (NormalizedDate::Known(x), NormalizedDate::Known(y)) => y.cmp(x),
            (NormalizedDate::Known(_), NormalizedDate::Unknown) => Ordering::Less,
            (NormalizedDate::Unknown, NormalizedDate::Known(_)) => Ordering::Greater,
            (NormalizedDate::Unknown, NormalizedDate::Unknown) => Ordering::Equal,
        }
    }

    /// Value for the store's date column: `YYYY-MM-DD`, or empty when unknown.
    pub fn to_field(&self) -> String {
        match self {
            NormalizedDate::Known(d) => d.format("%Y-%m-%d").to_string(),
            NormalizedDate::Unknown => String::new(),
        }
    }

    /// Inverse of [`NormalizedDate::to_field`].
    pub fn from_field(field: &str) -> Self {
        NaiveDate::parse_from_str(field.trim(), "%Y-%m-%d")
            .map(NormalizedDate::Known)
            .unwrap_or(NormalizedDate::Unknown)
    }
}

impl fmt::Display for NormalizedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedDate::Known(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            NormalizedDate::Unknown => f.write_str("unknown"),
        }
    }
}

/// Convert free-form date text to a calendar date.
///
/// Whitespace (including non-breaking spaces) is collapsed before matching.
/// The first format that parses wins; see the module docs for the order.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize("Friday 28 November 2025").to_string(), "2025-11-28");
/// assert_eq!(normalize("November 2025").to_string(), "2025-11-01");
/// assert_eq!(normalize("not a date"), NormalizedDate::Unknown);
/// ```
pub fn normalize(raw: &str) -> NormalizedDate {
    let text = collapse_whitespace(raw);
    if text.is_empty() {
        return NormalizedDate::Unknown;
    }

    let parsed = parse_epoch(&text)
        .or_else(|| parse_structured(&text))
        .or_else(|| {
            let stripped = strip_prefixes(&text);
            parse_day_month_year(stripped).or_else(|| parse_month_year(stripped))
        });

    match parsed {
        Some(Ok(date)) => NormalizedDate::Known(date),
        Some(Err(())) => {
            debug!(raw = %text, "implausible epoch value");
            NormalizedDate::Unknown
        }
        None => {
            debug!(raw = %text, "no date format matched");
            NormalizedDate::Unknown
        }
    }
}

/// Find the first date phrase in free text.
///
/// Prefers a full day-month-year phrase ("26 November 2025") and falls back
/// to month-year ("November 2025"). Used by adapters that locate dates in the
/// text surrounding a link or in an article body.
pub fn find_date_text(text: &str) -> Option<String> {
    let text = collapse_whitespace(text);
    DAY_MONTH_YEAR
        .find(&text)
        .or_else(|| MONTH_YEAR.find(&text))
        .map(|m| m.as_str().to_string())
}

/// `Some(Ok)` for a plausible epoch, `Some(Err)` for an implausible one, `None`
/// when the text is not numeric at all.
fn parse_epoch(text: &str) -> Option<Result<NaiveDate, ()>> {
    let digits: String = text.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let Ok(mut value) = digits.parse::<u64>() else {
        return Some(Err(()));
    };
    if value > EPOCH_MILLIS_THRESHOLD {
        value /= 1000;
    }
    let date = i64::try_from(value)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.date_naive())
        .filter(|d| EPOCH_YEARS.contains(&d.year()));
    Some(date.ok_or(()))
}

fn parse_structured(text: &str) -> Option<Result<NaiveDate, ()>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(Ok(dt.date_naive()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Ok(dt.date_naive()));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(Ok(dt.date_naive()));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Ok(dt.date()));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Ok)
}

fn strip_prefixes(text: &str) -> &str {
    let text = match PUBLISHED_PREFIX.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    };
    match WEEKDAY_PREFIX.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// Day-month-year with a month name. Trailing time or zone text after the
/// year ("2 December 2025 2.30 pm AEDT") is ignored.
fn parse_day_month_year(text: &str) -> Option<Result<NaiveDate, ()>> {
    let text = text.replace('.', " ");
    let text = SEPT.replace_all(&text, "Sep");
    let text = collapse_whitespace(&text);
    for fmt in DAY_MONTH_YEAR_FORMATS {
        if let Ok((date, rest)) = NaiveDate::parse_and_remainder(&text, fmt) {
            let clean_tail = rest.is_empty() || rest.starts_with(' ') || rest.starts_with(',');
            if clean_tail && date.year() >= MIN_TEXT_YEAR {
                return Some(Ok(date));
            }
        }
    }
    None
}

fn parse_month_year(text: &str) -> Option<Result<NaiveDate, ()>> {
    if !MONTH_YEAR.is_match(text) {
        return None;
    }
    let text = SEPT.replace_all(text, "Sep");
    let padded = format!("1 {}", text.trim_end_matches('.'));
    for fmt in ["%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&padded, fmt) {
            if date.year() >= MIN_TEXT_YEAR {
                return Some(Ok(date));
            }
        }
    }
    None
}
