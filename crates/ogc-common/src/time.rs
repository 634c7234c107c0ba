//! Datetime instants and intervals for temporal filtering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Parse an ISO 8601 timestamp, assuming UTC when no offset is given.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    // Try full datetime with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try without timezone (assume UTC)
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    // Try date only
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// A closed or half-open time interval. `None` bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeInterval {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Interval with both bounds open.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Reject intervals whose start is after their end.
    pub fn validate(&self) -> Result<(), TimeParseError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(TimeParseError::InvertedInterval(format!(
                    "{}/{}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    /// Inclusive containment test.
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *t >= s) && self.end.map_or(true, |e| *t <= e)
    }

    /// Whether two intervals share at least one instant.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        let starts_before_other_ends = match (self.start, other.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        };
        let ends_after_other_starts = match (self.end, other.start) {
            (Some(e), Some(s)) => e >= s,
            _ => true,
        };
        starts_before_other_ends && ends_after_other_starts
    }
}

/// A `datetime` query value: one instant or an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateTimeFilter {
    Instant(DateTime<Utc>),
    Interval(TimeInterval),
}

impl DateTimeFilter {
    /// Parse a datetime parameter.
    ///
    /// Accepts formats:
    /// - Instant: `2024-12-29T12:00:00Z`
    /// - Interval: `2024-12-29T00:00:00Z/2024-12-29T23:59:59Z`
    /// - Open start: `../2024-12-29T23:59:59Z` or `/2024-12-29T23:59:59Z`
    /// - Open end: `2024-12-29T00:00:00Z/..` or `2024-12-29T00:00:00Z/`
    pub fn parse(datetime: &str) -> Result<Self, TimeParseError> {
        let datetime = datetime.trim();
        if datetime.is_empty() {
            return Err(TimeParseError::InvalidFormat(datetime.to_string()));
        }

        if datetime.contains('/') {
            let parts: Vec<&str> = datetime.split('/').collect();
            if parts.len() != 2 {
                return Err(TimeParseError::InvalidFormat(datetime.to_string()));
            }

            let bound = |s: &str| -> Result<Option<DateTime<Utc>>, TimeParseError> {
                let s = s.trim();
                if s.is_empty() || s == ".." {
                    Ok(None)
                } else {
                    parse_timestamp(s).map(Some)
                }
            };

            let interval = TimeInterval::new(bound(parts[0])?, bound(parts[1])?);
            interval.validate()?;
            return Ok(DateTimeFilter::Interval(interval));
        }

        parse_timestamp(datetime).map(DateTimeFilter::Instant)
    }

    /// The filter as an interval (an instant is a degenerate interval).
    pub fn as_interval(&self) -> TimeInterval {
        match self {
            DateTimeFilter::Instant(t) => TimeInterval::new(Some(*t), Some(*t)),
            DateTimeFilter::Interval(interval) => *interval,
        }
    }

    /// Check whether a timestamp satisfies the filter.
    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        self.as_interval().contains(t)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Interval start is after its end: {0}")]
    InvertedInterval(String),
}

/// Serde helper for durations written as (fractional) seconds.
///
/// Zero, negative and non-finite values are rejected.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(serde::de::Error::custom(
                "duration must be a positive number of seconds",
            ));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn test_parse_instant_formats() {
        assert_eq!(ts("2024-01-15T12:00:00Z"), ts("2024-01-15T12:00:00+00:00"));
        assert_eq!(ts("2024-01-15T12:00:00"), ts("2024-01-15T12:00:00Z"));
        assert_eq!(ts("2024-01-15"), ts("2024-01-15T00:00:00Z"));
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_interval_open_ends() {
        let open_start = DateTimeFilter::parse("../2024-12-29T23:59:59Z").unwrap();
        assert_eq!(
            open_start,
            DateTimeFilter::Interval(TimeInterval::new(None, Some(ts("2024-12-29T23:59:59Z"))))
        );

        let open_end = DateTimeFilter::parse("2024-12-29T00:00:00Z/").unwrap();
        assert_eq!(
            open_end,
            DateTimeFilter::Interval(TimeInterval::new(Some(ts("2024-12-29T00:00:00Z")), None))
        );

        let both_open = DateTimeFilter::parse("../..").unwrap();
        assert_eq!(both_open, DateTimeFilter::Interval(TimeInterval::unbounded()));
    }

    #[test]
    fn test_parse_interval_rejects_inverted() {
        let result = DateTimeFilter::parse("2024-12-30T00:00:00Z/2024-12-29T00:00:00Z");
        assert!(matches!(result, Err(TimeParseError::InvertedInterval(_))));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(DateTimeFilter::parse("2024-01-01/2024-02-01/2024-03-01").is_err());
        assert!(DateTimeFilter::parse("2024-13-01/..").is_err());
        assert!(DateTimeFilter::parse("").is_err());
    }

    #[test]
    fn test_matches() {
        let filter = DateTimeFilter::parse("2024-01-01/2024-01-31").unwrap();
        assert!(filter.matches(&ts("2024-01-15T00:00:00Z")));
        assert!(filter.matches(&ts("2024-01-01T00:00:00Z")));
        assert!(!filter.matches(&ts("2024-02-15T00:00:00Z")));

        let instant = DateTimeFilter::parse("2024-01-15T06:00:00Z").unwrap();
        assert!(instant.matches(&ts("2024-01-15T06:00:00Z")));
        assert!(!instant.matches(&ts("2024-01-15T06:00:01Z")));
    }

    #[test]
    fn test_overlaps() {
        let a = TimeInterval::new(Some(ts("2024-01-01")), Some(ts("2024-01-31")));
        let b = TimeInterval::new(Some(ts("2024-01-31")), None);
        let c = TimeInterval::new(None, Some(ts("2023-12-31")));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(TimeInterval::unbounded().overlaps(&c));
    }
}
