//! Five-field cron expressions: `MIN HOUR DOM MON DOW`.
//!
//! Each field accepts `*`, single values, ranges (`a-b`), steps (`*/n`,
//! `a-b/n`, `a/n`) and comma lists. Months and weekdays also accept
//! three-letter names. `?` is a synonym for `*` in the day fields.
//! There is no seconds field; the finest granularity is one minute.
//!
//! Expressions are checked and rewritten into the six-field form of the
//! `cron` crate (leading `0` seconds, weekdays numbered from Sunday = 1),
//! which does the fire-time computation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::{Schedule, TimeUnitSpec};

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),
    #[error("descriptors like '{0}' are not supported, use 5 fields")]
    Descriptor(String),
    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("unsupported expression: {0}")]
    Unsupported(String),
    #[error("schedule never fires: no month has the requested day")]
    NeverFires,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    pub(crate) const ALL: [FieldKind; 5] = [
        Self::Minute,
        Self::Hour,
        Self::DayOfMonth,
        Self::Month,
        Self::DayOfWeek,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 6),
        }
    }

    /// Names accepted in place of numbers, indexed from the field minimum.
    fn names(self) -> &'static [&'static str] {
        match self {
            Self::Month => MONTH_NAMES,
            Self::DayOfWeek => WEEKDAY_NAMES,
            _ => &[],
        }
    }

    fn allows_question_mark(self) -> bool {
        matches!(self, Self::DayOfMonth | Self::DayOfWeek)
    }

    /// The `cron` crate counts weekdays 1-7 from Sunday.
    fn to_crate(self, value: u32) -> u32 {
        match self {
            Self::DayOfWeek => value + 1,
            _ => value,
        }
    }
}

/// A field rewritten for the `cron` crate.
struct Normalized {
    text: String,
    /// False for `*`, `?` and `*/1`.
    restricted: bool,
}

/// A validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    source: String,
    schedule: Schedule,
    /// Fire sets. Two entries when both day fields are restricted, since a
    /// day then matches on either one.
    triggers: Vec<Schedule>,
    restricted: [bool; 5],
}

impl CronSchedule {
    /// Parse a 5-field expression. Surrounding whitespace is ignored.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let source = expression.trim();
        if source.starts_with('@') {
            return Err(CronError::Descriptor(source.to_string()));
        }
        let parts: Vec<&str> = source.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let fields = parts
            .iter()
            .zip(FieldKind::ALL)
            .map(|(raw, kind)| normalize_field(raw, kind))
            .collect::<Result<Vec<_>, _>>()?;

        let text: Vec<&str> = fields.iter().map(|f| f.text.as_str()).collect();
        let mut restricted = [false; 5];
        for (slot, field) in restricted.iter_mut().zip(&fields) {
            *slot = field.restricted;
        }

        let &[minute, hour, dom, month, dow] = text.as_slice() else {
            return Err(CronError::FieldCount(text.len()));
        };
        let schedule = build(&format!("0 {minute} {hour} {dom} {month} {dow}"))?;
        let either_day = restricted[FieldKind::DayOfMonth as usize]
            && restricted[FieldKind::DayOfWeek as usize];
        let triggers = if either_day {
            vec![
                build(&format!("0 {minute} {hour} {dom} {month} *"))?,
                build(&format!("0 {minute} {hour} * {month} {dow}"))?,
            ]
        } else {
            vec![schedule.clone()]
        };

        let parsed = Self {
            source: source.to_string(),
            schedule,
            triggers,
            restricted,
        };
        if !parsed.can_fire() {
            return Err(CronError::NeverFires);
        }
        Ok(parsed)
    }

    /// The expression exactly as accepted (trimmed).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn minutes(&self) -> Vec<u32> {
        self.schedule.minutes().iter().collect()
    }

    pub fn hours(&self) -> Vec<u32> {
        self.schedule.hours().iter().collect()
    }

    pub fn days_of_month(&self) -> Vec<u32> {
        self.schedule.days_of_month().iter().collect()
    }

    pub fn months(&self) -> Vec<u32> {
        self.schedule.months().iter().collect()
    }

    /// Weekdays with Sunday = 0.
    pub fn weekdays(&self) -> Vec<u32> {
        self.schedule
            .days_of_week()
            .iter()
            .map(|d| d.saturating_sub(1))
            .collect()
    }

    pub(crate) fn is_restricted(&self, kind: FieldKind) -> bool {
        self.restricted[kind as usize]
    }

    /// The field as the user wrote it.
    pub(crate) fn raw_field(&self, kind: FieldKind) -> &str {
        self.source
            .split_whitespace()
            .nth(kind as usize)
            .unwrap_or_default()
    }

    /// Whether some calendar day satisfies the month/day-of-month fields.
    fn can_fire(&self) -> bool {
        if !self.is_restricted(FieldKind::DayOfMonth) || self.is_restricted(FieldKind::DayOfWeek) {
            return true;
        }
        let days = self.days_of_month();
        self.months()
            .into_iter()
            .any(|m| days.iter().any(|d| *d <= longest_month(m)))
    }

    /// First fire time strictly after `after`, at minute resolution.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.triggers
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }

    /// The next `count` fire times after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronSchedule {}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn build(six_fields: &str) -> Result<Schedule, CronError> {
    Schedule::from_str(six_fields).map_err(|e| CronError::Unsupported(e.to_string()))
}

/// Longest length of a month in any year (February counts leap days).
fn longest_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Check one field against its bounds and rewrite names, `?` and weekday
/// numbers into what the `cron` crate expects.
fn normalize_field(raw: &str, kind: FieldKind) -> Result<Normalized, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: kind.name(),
        value: raw.to_string(),
        reason,
    };

    let (_, max) = kind.bounds();
    let elements: Vec<&str> = raw.split(',').collect();
    let mut restricted = true;
    let mut out = Vec::with_capacity(elements.len());

    for element in &elements {
        if element.is_empty() {
            return Err(invalid("empty list element".into()));
        }

        let (range, step) = match element.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{step}'")))?;
                if step == 0 {
                    return Err(invalid("step must be at least 1".into()));
                }
                (range, Some(step))
            }
            None => (*element, None),
        };

        let wildcard = range == "*" || (range == "?" && kind.allows_question_mark());
        let range = if wildcard {
            if elements.len() == 1 && step.unwrap_or(1) == 1 {
                restricted = false;
            }
            "*".to_string()
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo = parse_value(lo, kind).map_err(&invalid)?;
            let hi = parse_value(hi, kind).map_err(&invalid)?;
            if lo > hi {
                return Err(invalid(format!("range start {lo} is after end {hi}")));
            }
            format!("{}-{}", kind.to_crate(lo), kind.to_crate(hi))
        } else {
            let value = parse_value(range, kind).map_err(&invalid)?;
            // `a/n` runs from a to the field maximum.
            if step.is_some() {
                format!("{}-{}", kind.to_crate(value), kind.to_crate(max))
            } else {
                kind.to_crate(value).to_string()
            }
        };

        out.push(match step {
            Some(step) => format!("{range}/{step}"),
            None => range,
        });
    }

    Ok(Normalized {
        text: out.join(","),
        restricted,
    })
}

fn parse_value(token: &str, kind: FieldKind) -> Result<u32, String> {
    let (min, max) = kind.bounds();

    let value = match token.parse::<u32>() {
        Ok(v) => v,
        Err(_) => {
            let upper = token.to_ascii_uppercase();
            let index = kind
                .names()
                .iter()
                .position(|n| *n == upper)
                .ok_or_else(|| format!("'{token}' is not a number or name"))?;
            min + index as u32
        }
    };

    if value < min || value > max {
        return Err(format!("{value} is outside {min}-{max}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_wildcards() {
        let s = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(s.minutes().len(), 60);
        assert_eq!(s.hours().len(), 24);
        assert_eq!(s.days_of_month().len(), 31);
        assert_eq!(s.months().len(), 12);
        assert_eq!(s.weekdays(), (0..=6).collect::<Vec<_>>());
        assert!(!s.is_restricted(FieldKind::Minute));
    }

    #[test]
    fn test_parse_lists_ranges_steps() {
        let s = CronSchedule::parse("*/15 9-17 1,15 * MON-FRI").unwrap();
        assert_eq!(s.minutes(), vec![0, 15, 30, 45]);
        assert_eq!(s.hours(), (9..=17).collect::<Vec<_>>());
        assert_eq!(s.days_of_month(), vec![1, 15]);
        assert_eq!(s.weekdays(), vec![1, 2, 3, 4, 5]);
        assert!(s.is_restricted(FieldKind::Minute));
    }

    #[test]
    fn test_parse_names_case_insensitive() {
        let s = CronSchedule::parse("0 0 * jan,Dec sun").unwrap();
        assert_eq!(s.months(), vec![1, 12]);
        assert_eq!(s.weekdays(), vec![0]);
    }

    #[test]
    fn test_parse_value_with_step_runs_to_max() {
        let s = CronSchedule::parse("5/20 * * * *").unwrap();
        assert_eq!(s.minutes(), vec![5, 25, 45]);
    }

    #[test]
    fn test_weekday_step_keeps_sunday_based_days() {
        let s = CronSchedule::parse("0 0 * * */2").unwrap();
        assert_eq!(s.weekdays(), vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_question_mark_only_in_day_fields() {
        assert!(CronSchedule::parse("0 12 ? * MON").is_ok());
        assert!(CronSchedule::parse("? 12 * * *").is_err());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = CronSchedule::parse("61 * * * *").unwrap_err();
        assert!(matches!(err, CronError::InvalidField { field: "minute", .. }));
        assert!(CronSchedule::parse("0 24 * * *").is_err());
        assert!(CronSchedule::parse("0 0 0 * *").is_err());
        assert!(CronSchedule::parse("0 0 * 13 *").is_err());
        assert!(CronSchedule::parse("0 0 * * 7").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(
            CronSchedule::parse("* * * *").unwrap_err(),
            CronError::FieldCount(4)
        );
        assert_eq!(
            CronSchedule::parse("0 * * * * *").unwrap_err(),
            CronError::FieldCount(6)
        );
        assert_eq!(
            CronSchedule::parse("@daily").unwrap_err(),
            CronError::Descriptor("@daily".into())
        );
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
        assert!(CronSchedule::parse("1,,2 * * * *").is_err());
        assert!(CronSchedule::parse("every day").is_err());
    }

    #[test]
    fn test_rejects_impossible_day() {
        assert_eq!(
            CronSchedule::parse("0 0 30 feb *").unwrap_err(),
            CronError::NeverFires
        );
        // Leap day is possible.
        assert!(CronSchedule::parse("0 0 29 2 *").is_ok());
    }

    #[test]
    fn test_source_is_preserved() {
        let s = CronSchedule::parse("  0 9 * * mon-fri ").unwrap();
        assert_eq!(s.as_str(), "0 9 * * mon-fri");
        assert_eq!(s.to_string(), "0 9 * * mon-fri");
        assert_eq!(CronSchedule::parse(s.as_str()).unwrap(), s);
    }

    #[test]
    fn test_next_after_same_day() {
        let s = CronSchedule::parse("30 9 * * *").unwrap();
        assert_eq!(
            s.next_after(at("2025-03-10T08:00:00Z")),
            Some(at("2025-03-10T09:30:00Z"))
        );
        // Strictly after.
        assert_eq!(
            s.next_after(at("2025-03-10T09:30:00Z")),
            Some(at("2025-03-11T09:30:00Z"))
        );
    }

    #[test]
    fn test_next_after_weekday_only() {
        // 2025-03-08 is a Saturday.
        let s = CronSchedule::parse("0 8 * * MON-FRI").unwrap();
        assert_eq!(
            s.next_after(at("2025-03-08T12:00:00Z")),
            Some(at("2025-03-10T08:00:00Z"))
        );
    }

    #[test]
    fn test_next_after_sunday_zero() {
        // 2025-03-10 is a Monday; the next Sunday is the 16th.
        let s = CronSchedule::parse("0 10 * * 0").unwrap();
        assert_eq!(
            s.next_after(at("2025-03-10T00:00:00Z")),
            Some(at("2025-03-16T10:00:00Z"))
        );
    }

    #[test]
    fn test_next_after_dom_or_dow() {
        // Both restricted: the 15th OR any Monday.
        let s = CronSchedule::parse("0 0 15 * 1").unwrap();
        // 2025-03-11 is a Tuesday; next Monday is the 17th, the 15th comes first.
        assert_eq!(
            s.next_after(at("2025-03-11T00:00:00Z")),
            Some(at("2025-03-15T00:00:00Z"))
        );
        assert_eq!(
            s.next_after(at("2025-03-15T00:00:00Z")),
            Some(at("2025-03-17T00:00:00Z"))
        );
    }

    #[test]
    fn test_next_after_leap_day() {
        let s = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            s.next_after(at("2025-01-01T00:00:00Z")),
            Some(at("2028-02-29T00:00:00Z"))
        );
    }

    #[test]
    fn test_next_after_ignores_seconds() {
        let s = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(
            s.next_after(at("2025-03-10T08:00:42Z")),
            Some(at("2025-03-10T08:01:00Z"))
        );
    }

    #[test]
    fn test_upcoming() {
        let s = CronSchedule::parse("0 */12 * * *").unwrap();
        let times = s.upcoming(at("2025-03-10T01:00:00Z"), 3);
        assert_eq!(
            times,
            vec![
                at("2025-03-10T12:00:00Z"),
                at("2025-03-11T00:00:00Z"),
                at("2025-03-11T12:00:00Z"),
            ]
        );
    }
}
