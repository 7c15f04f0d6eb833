//! Primitive validators for inbound parameters.
//!
//! Everything the HTTP surface accepts passes through here before it touches
//! the registry or the store. Each failure is a distinct typed error so the
//! API layer can map it straight to a 400 with a precise reason.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("'{0}' is not an integer")]
    NotInteger(String),

    #[error("'{0}' is not a positive float")]
    NotPositiveFloat(String),

    #[error("'{0}' is not a valid cron line")]
    NotCronLine(String),

    #[error("'{0}' is not an absolute URI")]
    NotUri(String),

    #[error("'{0}' is not an RFC 2616 HTTP date")]
    NotHttpDate(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),

    #[error("severity 'warning' requires a warning_callback_uri")]
    MissingWarningCallback,
}

pub fn integer(value: &str) -> Result<i64, ValidationError> {
    value.trim().parse::<i64>().map_err(|_| ValidationError::NotInteger(value.to_string()))
}

pub fn positive_float(value: &str) -> Result<f64, ValidationError> {
    match value.trim().parse::<f64>() {
        Ok(f) if f >= 0.0 && f.is_finite() => Ok(f),
        _ => Err(ValidationError::NotPositiveFloat(value.to_string())),
    }
}

/// Validate a 5-field cron line (minute hour day-of-month month day-of-week).
pub fn cron_line(value: &str) -> Result<(), ValidationError> {
    cron_schedule(value).map(|_| ())
}

/// Parse a 5-field cron line into a [`Schedule`].
///
/// Two translations bridge classic cron syntax and the `cron` crate: a zero
/// seconds field is prepended (the crate expects 6/7 fields), and numeric
/// day-of-week ordinals are rewritten to day names, because classic cron
/// counts Sunday as 0 (or 7) while the crate numbers days differently.
pub fn cron_schedule(value: &str) -> Result<Schedule, ValidationError> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ValidationError::NotCronLine(value.to_string()));
    }
    let day_of_week =
        translate_day_of_week(fields[4]).ok_or_else(|| ValidationError::NotCronLine(value.to_string()))?;
    let line = format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], day_of_week);
    Schedule::from_str(&line).map_err(|_| ValidationError::NotCronLine(value.to_string()))
}

/// Day names indexed by classic cron ordinal; 7 wraps back to Sunday.
const DAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn translate_day_of_week(field: &str) -> Option<String> {
    let mut parts = Vec::new();
    for part in field.split(',') {
        let (body, step) = match part.split_once('/') {
            Some((body, step)) => (body, Some(step)),
            None => (part, None),
        };
        let body = if body == "*" {
            "*".to_string()
        } else if let Some((lo, hi)) = body.split_once('-') {
            format!("{}-{}", day_token(lo)?, day_token(hi)?)
        } else {
            day_token(body)?
        };
        parts.push(match step {
            Some(step) => format!("{body}/{step}"),
            None => body,
        });
    }
    Some(parts.join(","))
}

fn day_token(token: &str) -> Option<String> {
    match token.parse::<usize>() {
        Ok(ordinal) => DAY_NAMES.get(ordinal).map(|name| name.to_string()),
        Err(_) => Some(token.to_string()),
    }
}

/// Validate an absolute URI with a host component.
pub fn uri(value: &str) -> Result<Url, ValidationError> {
    match Url::parse(value) {
        Ok(url) if url.has_host() => Ok(url),
        _ => Err(ValidationError::NotUri(value.to_string())),
    }
}

/// Parse an RFC 2616 HTTP-date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
///
/// HTTP-dates are a subset of RFC 2822 with the obsolete `GMT` zone name,
/// which chrono's 2822 parser accepts.
pub fn http_date(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::NotHttpDate(value.to_string()))
}

/// Format a timestamp as an RFC 2616 HTTP-date for response headers.
pub fn format_http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn integers() {
        assert_eq!(integer("42"), Ok(42));
        assert_eq!(integer(" -7 "), Ok(-7));
        assert!(matches!(integer("4.2"), Err(ValidationError::NotInteger(_))));
        assert!(matches!(integer("x"), Err(ValidationError::NotInteger(_))));
    }

    #[test]
    fn positive_floats() {
        assert_eq!(positive_float("0.5"), Ok(0.5));
        assert_eq!(positive_float("0"), Ok(0.0));
        assert!(matches!(positive_float("-0.1"), Err(ValidationError::NotPositiveFloat(_))));
        assert!(matches!(positive_float("NaN"), Err(ValidationError::NotPositiveFloat(_))));
    }

    #[test]
    fn cron_lines() {
        assert!(cron_line("0 0 * * 0").is_ok());
        assert!(cron_line("0 0 * * 7").is_ok());
        assert!(cron_line("30 4 * * 1-5").is_ok());
        assert!(cron_line("0 0 * * Mon,Fri").is_ok());
        assert!(cron_line("*/5 * * * *").is_ok());
        assert!(matches!(cron_line("not cron"), Err(ValidationError::NotCronLine(_))));
        assert!(matches!(cron_line("0 0 * * 8"), Err(ValidationError::NotCronLine(_))));
        // 6-field lines belong to the crate's extended syntax, not this config.
        assert!(matches!(cron_line("0 0 0 * * 0"), Err(ValidationError::NotCronLine(_))));
    }

    #[test]
    fn weekly_schedule_fires_on_sunday_midnight() {
        let schedule = cron_schedule("0 0 * * 0").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap(); // a Wednesday
        let next = schedule.after(&after).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap());
    }

    #[test]
    fn uris() {
        assert!(uri("https://example.com/cat.jpg").is_ok());
        assert!(matches!(uri("not a uri"), Err(ValidationError::NotUri(_))));
        assert!(matches!(uri("/relative/path"), Err(ValidationError::NotUri(_))));
    }

    #[test]
    fn http_dates_round_trip() {
        let parsed = http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap());
        assert_eq!(format_http_date(parsed), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(matches!(http_date("yesterday"), Err(ValidationError::NotHttpDate(_))));
    }
}
