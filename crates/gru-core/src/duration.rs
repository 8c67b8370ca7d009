//! Go-style duration strings (`"1h2m3.5s"`, `"90s"`, `"250ms"`).
//!
//! The quiz server reports durations and remaining time in this format, and
//! the TOML config uses it too.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("negative duration")]
    Negative,
    #[error("invalid number in duration: {0:?}")]
    InvalidNumber(String),
    #[error("missing unit after {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
    #[error("duration overflows")]
    Overflow,
}

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "µs" => Some(1_000.0),
        "ms" => Some(1_000_000.0),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60.0 * NANOS_PER_SEC),
        "h" => Some(3600.0 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Parse a Go-style duration string.
///
/// A bare `"0"` is accepted; every other number needs a unit.
pub fn parse_go_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    let s = match s.strip_prefix('-') {
        Some(rest) if rest == "0" => return Ok(Duration::ZERO),
        Some(_) => return Err(DurationParseError::Negative),
        None => s.strip_prefix('+').unwrap_or(s),
    };
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let mut total_nanos = 0.0_f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(num_len);
        if number.is_empty() || number == "." {
            return Err(DurationParseError::InvalidNumber(rest.to_string()));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(number.to_string()))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationParseError::MissingUnit(number.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationParseError::UnknownUnit(unit.to_string()))?;

        total_nanos += value * scale;
        rest = next;
    }

    #[expect(clippy::cast_precision_loss)]
    let max = u64::MAX as f64;
    if !total_nanos.is_finite() || total_nanos > max {
        return Err(DurationParseError::Overflow);
    }
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = total_nanos.round() as u64;
    Ok(Duration::from_nanos(nanos))
}

/// Format a duration the way the server expects it (`"2m0s"`, `"1h0m0s"`,
/// `"250ms"`). Sub-millisecond precision is dropped.
pub fn format_go_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let millis = d.subsec_millis();
    if secs == 0 {
        return if millis == 0 {
            "0s".to_string()
        } else {
            format!("{millis}ms")
        };
    }

    let seconds = if millis == 0 {
        format!("{}s", secs % 60)
    } else {
        let frac = format!("{millis:03}");
        format!("{}.{}s", secs % 60, frac.trim_end_matches('0'))
    };

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}")
    } else {
        seconds
    }
}

/// `mm:ss` display used by the time boxes. Minutes are not wrapped into
/// hours, so a 90 minute quiz shows `90:00`.
pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Serde adapter for `Duration` fields written as Go-style strings.
pub mod serde_go {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_go_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_go_duration(&raw).map_err(serde::de::Error::custom)
    }
}
