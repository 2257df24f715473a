use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WindowError {
    #[error("window start {0} is not before end {1}")]
    StartNotBeforeEnd(DateTime<Utc>, DateTime<Utc>),

    #[error("windows do not intersect")]
    EmptyIntersection,

    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),
}

/// Parses an ISO-8601 timestamp with optional fractional seconds and optional
/// `Z`/offset suffix. Bare dates are taken as midnight UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, WindowError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    Err(WindowError::BadTimestamp(value.to_string()))
}

/// Half-open time interval `[start, end)`. A `None` endpoint is unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, WindowError> {
        if let (Some(s), Some(e)) = (start, end)
            && s >= e
        {
            return Err(WindowError::StartNotBeforeEnd(s, e));
        }
        Ok(TimeWindow { start, end })
    }

    /// The window covering all of time.
    pub fn open() -> Self {
        TimeWindow {
            start: None,
            end: None,
        }
    }

    /// True when the two windows share at least one instant. Open endpoints
    /// behave as infinities.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        let start = max_start(self.start, other.start);
        let end = min_end(self.end, other.end);
        match (start, end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        }
    }

    /// True when `other` lies entirely within this window.
    pub fn covers(&self, other: &TimeWindow) -> bool {
        let start_ok = match (self.start, other.start) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a <= b,
        };
        let end_ok = match (self.end, other.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        };
        start_ok && end_ok
    }

    /// Componentwise `max(start)` / `min(end)`. Fails when the result would be
    /// empty.
    pub fn intersection(&self, other: &TimeWindow) -> Result<TimeWindow, WindowError> {
        let start = max_start(self.start, other.start);
        let end = min_end(self.end, other.end);
        if let (Some(s), Some(e)) = (start, end)
            && s >= e
        {
            return Err(WindowError::EmptyIntersection);
        }
        Ok(TimeWindow { start, end })
    }

    /// `self \ other`: up to two sub-windows, the part before `other` starts
    /// and the part after it ends, each clamped to `self`. A disjoint `other`
    /// leaves `self` intact as a single piece.
    pub fn difference(&self, other: &TimeWindow) -> Vec<TimeWindow> {
        let mut pieces = Vec::new();

        if let Some(ostart) = other.start {
            let end = match self.end {
                Some(e) => e.min(ostart),
                None => ostart,
            };
            if self.start.is_none_or(|s| s < end) {
                pieces.push(TimeWindow {
                    start: self.start,
                    end: Some(end),
                });
            }
        }

        if let Some(oend) = other.end {
            let start = match self.start {
                Some(s) => s.max(oend),
                None => oend,
            };
            if self.end.is_none_or(|e| start < e) {
                pieces.push(TimeWindow {
                    start: Some(start),
                    end: self.end,
                });
            }
        }

        pieces
    }
}

fn max_start(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn min_end(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_end = |v: &Option<DateTime<Utc>>| match v {
            Some(t) => t.to_rfc3339(),
            None => "open".to_string(),
        };
        write!(f, "[{}, {})", fmt_end(&self.start), fmt_end(&self.end))
    }
}
