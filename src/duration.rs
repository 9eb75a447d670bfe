//! Human duration strings
//!
//! Moderators type durations like `30m` or `7d`; logs show them back as
//! `1d 1h 1m 1s`. All values are milliseconds.

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
/// 365.25 days, as moderators expect from `1y`
const YEAR: u64 = 31_557_600_000;

/// Units used when formatting, largest first
const FORMAT_UNITS: [(&str, u64); 6] = [
    ("y", 31_536_000_000),
    ("M", 2_592_000_000),
    ("d", DAY),
    ("h", HOUR),
    ("m", MINUTE),
    ("s", SECOND),
];

/// Parse a duration such as `10s`, `20m`, `2 hours`, `1.5d`.
///
/// The input needs both a number and a unit. Units are case-insensitive.
/// Returns `None` for anything else, including negative values.
#[must_use]
pub fn parse_duration(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    if !number.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: f64 = number.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "week" | "weeks" => WEEK,
        "y" | "yr" | "yrs" | "year" | "years" => YEAR,
        _ => return None,
    };

    #[allow(clippy::cast_precision_loss)]
    let millis = (value * multiplier as f64).round();
    if !millis.is_finite() || millis >= u64::MAX as f64 {
        return None;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = millis as u64;
    Some(millis)
}

/// Format milliseconds as space-separated units, e.g. `1d 1h 1m 1s`.
///
/// Sub-second remainders are dropped; durations under a second are `0s`.
#[must_use]
pub fn format_duration(millis: u64) -> String {
    let mut remaining = millis;
    let mut parts = Vec::new();

    for (label, unit) in FORMAT_UNITS {
        let count = remaining / unit;
        if count > 0 {
            parts.push(format!("{count}{label}"));
            remaining -= count * unit;
        }
    }

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}
