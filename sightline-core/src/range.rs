//! Sightline Core - Date ranges
//!
//! Views partition their data by time window. [`DateRange`] is half-open:
//! the start instant is inside the range, the end instant is not, so
//! adjacent windows tile without overlap.

use std::fmt;

use chrono::{Days, NaiveDate, NaiveTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::{timestamp_value, Comparator, Filter, QueryError, Timestamp};

/// A half-open UTC time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: Timestamp,
    end: Timestamp,
}

impl DateRange {
    /// Build a range, rejecting `end < start`. `end == start` is the
    /// empty range.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, QueryError> {
        if end < start {
            return Err(QueryError::InvalidRange {
                start: start.to_rfc3339_opts(SecondsFormat::Millis, true),
                end: end.to_rfc3339_opts(SecondsFormat::Millis, true),
            });
        }
        Ok(DateRange { start, end })
    }

    /// The range covering a single UTC calendar day.
    pub fn for_day(day: NaiveDate) -> Self {
        let next = day.succ_opt().unwrap_or(NaiveDate::MAX);
        DateRange {
            start: day.and_time(NaiveTime::MIN).and_utc(),
            end: next.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// The `days` calendar days ending just before `end_exclusive`.
    pub fn trailing_days(days: u64, end_exclusive: NaiveDate) -> Self {
        let first = end_exclusive
            .checked_sub_days(Days::new(days))
            .unwrap_or(NaiveDate::MIN);
        DateRange {
            start: first.and_time(NaiveTime::MIN).and_utc(),
            end: end_exclusive.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Whether an instant falls inside the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Whether any part of the given UTC calendar day overlaps the range.
    pub fn contains_day(&self, day: NaiveDate) -> bool {
        let d = DateRange::for_day(day);
        d.start < self.end && d.end > self.start
    }

    /// All UTC calendar days overlapping the range, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        if self.is_empty() {
            return out;
        }
        let mut day = self.start.date_naive();
        while day.and_time(NaiveTime::MIN).and_utc() < self.end {
            out.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }

    /// Equality filter pinning both bounds, as stored on view documents.
    pub fn to_partition_filter(&self, start_field: &str, end_field: &str) -> Filter {
        Filter::eq(start_field, timestamp_value(self.start))
            .and_eq(end_field, timestamp_value(self.end))
    }

    /// Filter selecting documents whose `date_field` falls inside the
    /// range.
    pub fn to_bounds_filter(&self, date_field: &str) -> Filter {
        Filter::cmp(date_field, Comparator::Gte, timestamp_value(self.start))
            .and_cmp(date_field, Comparator::Lt, timestamp_value(self.end))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}
