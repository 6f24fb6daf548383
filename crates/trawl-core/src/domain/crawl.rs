//! Crawl state for an external source.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Paused,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SourceStatus::Active),
            "paused" => Ok(SourceStatus::Paused),
            other => Err(format!("unknown source status '{other}'")),
        }
    }
}

/// Resumable traversal position for one source.
///
/// `oldest_date` is the backfill frontier and only moves backward.
/// `newest_date` is the incremental frontier and only moves forward.
/// `last_cursor` belongs to the window currently being drained and is cleared
/// before either frontier moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlState {
    pub source: String,
    pub status: SourceStatus,
    pub oldest_date: NaiveDate,
    pub newest_date: NaiveDate,
    pub last_cursor: Option<String>,
}

impl CrawlState {
    /// Fresh state with both frontiers at `today`.
    pub fn new(source: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Active,
            oldest_date: today,
            newest_date: today,
            last_cursor: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// The day before `date`: `[date - 1 00:00, date 00:00)`.
    pub fn day_before(date: NaiveDate) -> Self {
        let prev = date.pred_opt().unwrap_or(NaiveDate::MIN);
        Self {
            start: midnight(prev),
            end: midnight(date),
        }
    }

    /// From the start of `date` up to `now`.
    pub fn since(date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            start: midnight(date),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
