//! Input checks shared by the reminder form and the AI bridge.
//!
//! Everything here is pure; wall-clock time comes in through [`Clock`].

use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::expr::{CronError, CronSchedule};

/// Longest accepted job name, in characters.
pub const MAX_NAME_LEN: usize = 191;

/// Format of once-off schedules, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("job name must not be empty")]
    NameTooShort,
    #[error("job name must be at most {MAX_NAME_LEN} characters, got {0}")]
    NameTooLong(usize),
    #[error("message must not be empty")]
    MessageEmpty,
    #[error("'{0}' is not a UTC date and time in the format YYYY-MM-DD HH:MM:SS")]
    TimestampFormat(String),
    #[error("{0} UTC is not in the future")]
    TimestampNotFuture(String),
    #[error("invalid cron expression: {0}")]
    Cron(#[from] CronError),
}

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Trim and length-check a job name.
pub fn validate_job_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 {
        return Err(ValidationError::NameTooShort);
    }
    if len > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong(len));
    }
    Ok(name.to_string())
}

/// Trim and check a reminder message body.
pub fn validate_job_message(raw: &str) -> Result<String, ValidationError> {
    let message = raw.trim();
    if message.is_empty() {
        return Err(ValidationError::MessageEmpty);
    }
    Ok(message.to_string())
}

/// Parse a once-off schedule without checking that it lies in the future.
pub fn parse_schedule_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let text = raw.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ValidationError::TimestampFormat(text.to_string()))
}

/// Validate a once-off schedule, returning it in canonical form.
///
/// The time must be strictly after `now`.
pub fn validate_schedule_timestamp(
    raw: &str,
    now: DateTime<Utc>,
) -> Result<String, ValidationError> {
    let at = parse_schedule_timestamp(raw)?;
    let normalized = at.format(TIMESTAMP_FORMAT).to_string();
    if at <= now {
        return Err(ValidationError::TimestampNotFuture(normalized));
    }
    Ok(normalized)
}

/// Validate a cron expression. The accepted text is returned as-is (trimmed),
/// so storing and re-validating it never changes its meaning.
pub fn validate_cron(raw: &str) -> Result<CronSchedule, ValidationError> {
    Ok(CronSchedule::parse(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_job_name_bounds() {
        assert_eq!(validate_job_name("  Pay rent "), Ok("Pay rent".to_string()));
        assert_eq!(validate_job_name("   "), Err(ValidationError::NameTooShort));
        assert_eq!(validate_job_name(""), Err(ValidationError::NameTooShort));

        let longest = "é".repeat(MAX_NAME_LEN);
        assert!(validate_job_name(&longest).is_ok());
        let too_long = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            validate_job_name(&too_long),
            Err(ValidationError::NameTooLong(MAX_NAME_LEN + 1))
        );
    }

    #[test]
    fn test_job_message() {
        assert_eq!(validate_job_message("Pay rent!\n"), Ok("Pay rent!".to_string()));
        assert_eq!(validate_job_message(" \n\t"), Err(ValidationError::MessageEmpty));
    }

    #[test]
    fn test_timestamp_must_be_future() {
        let now = at("2025-06-01T12:00:00Z");
        assert_eq!(
            validate_schedule_timestamp("2025-06-01 12:00:01", now),
            Ok("2025-06-01 12:00:01".to_string())
        );
        assert!(matches!(
            validate_schedule_timestamp("2025-06-01 12:00:00", now),
            Err(ValidationError::TimestampNotFuture(_))
        ));
        assert!(matches!(
            validate_schedule_timestamp("2020-01-01 00:00:00", now),
            Err(ValidationError::TimestampNotFuture(_))
        ));
    }

    #[test]
    fn test_timestamp_format() {
        let now = at("2025-06-01T12:00:00Z");
        for bad in ["2099-01-01", "2099-01-01T00:00:00", "tomorrow", "2099-02-30 00:00:00"] {
            assert!(
                matches!(
                    validate_schedule_timestamp(bad, now),
                    Err(ValidationError::TimestampFormat(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert_eq!(
            validate_schedule_timestamp(" 2099-01-01 00:00:00 ", now),
            Ok("2099-01-01 00:00:00".to_string())
        );
    }

    #[test]
    fn test_parse_timestamp_ignores_now() {
        let parsed = parse_schedule_timestamp("2000-01-01 00:00:00").unwrap();
        assert_eq!(parsed, at("2000-01-01T00:00:00Z"));
    }

    #[test]
    fn test_cron_round_trip() {
        let schedule = validate_cron(" 0 9 * * mon-fri ").unwrap();
        assert_eq!(schedule.as_str(), "0 9 * * mon-fri");
        assert!(validate_cron(schedule.as_str()).is_ok());
        assert!(matches!(
            validate_cron("61 * * * *"),
            Err(ValidationError::Cron(CronError::InvalidField { .. }))
        ));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(at("2025-06-01T12:00:00Z"));
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), at("2025-06-01T12:05:00Z"));
        clock.set(at("2030-01-01T00:00:00Z"));
        assert_eq!(clock.now(), at("2030-01-01T00:00:00Z"));
    }
}
