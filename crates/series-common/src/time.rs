//! Discrete time steps for regularly spaced raster series.
//!
//! A [`TimeStep`] is one period of a [`Cadence`]: a single day, a dekad
//! (days 1-10, 11-20 and 21-end of month) or a calendar month. Steps of the
//! same cadence are totally ordered and contiguous, so a date range maps onto
//! exactly one list of steps.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{SeriesError, SeriesResult};

/// Number of dekads in a calendar year.
pub const DEKADS_PER_YEAR: i64 = 36;

/// Temporal cadence of a dataset or of the requested output series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Dekad,
    Monthly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Dekad => "dekad",
            Cadence::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "day" | "d" => Ok(Cadence::Daily),
            "dekad" | "dekadal" | "10d" => Ok(Cadence::Dekad),
            "monthly" | "month" | "m" => Ok(Cadence::Monthly),
            other => Err(SeriesError::InvalidCadence(other.to_string())),
        }
    }
}

/// One period of a cadence, identified by its first day.
///
/// Ordering compares the first day, so steps of one cadence sort
/// chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeStep {
    start: NaiveDate,
    cadence: Cadence,
}

impl TimeStep {
    /// The step of `cadence` that contains `date`.
    pub fn containing(date: NaiveDate, cadence: Cadence) -> Self {
        let first_day = match cadence {
            Cadence::Daily => date.day(),
            Cadence::Dekad => (dekad_of_month(date.day()) - 1) * 10 + 1,
            Cadence::Monthly => 1,
        };
        let start = date - Days::new(u64::from(date.day() - first_day));
        Self { start, cadence }
    }

    /// Builds a step from its year, month and sub-month index
    /// (day for daily, dekad 1-3 for dekads, ignored for monthly).
    pub fn new(year: i32, month: u32, index: u32, cadence: Cadence) -> SeriesResult<Self> {
        let day = match cadence {
            Cadence::Daily => index,
            Cadence::Dekad if (1..=3).contains(&index) => (index - 1) * 10 + 1,
            Cadence::Dekad => {
                return Err(SeriesError::InvalidDate(format!(
                    "dekad index {} out of 1..=3",
                    index
                )))
            }
            Cadence::Monthly => 1,
        };
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            SeriesError::InvalidDate(format!("{:04}-{:02}-{:02}", year, month, day))
        })?;
        Ok(Self::containing(date, cadence))
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    pub fn month(&self) -> u32 {
        self.start.month()
    }

    /// Sub-month index: the day for daily steps, 1-3 for dekads, 1 for months.
    pub fn index(&self) -> u32 {
        match self.cadence {
            Cadence::Daily => self.start.day(),
            Cadence::Dekad => self.dekad_of_month(),
            Cadence::Monthly => 1,
        }
    }

    /// Dekad of the month (1-3) the step starts in.
    pub fn dekad_of_month(&self) -> u32 {
        dekad_of_month(self.start.day())
    }

    /// First day of the step.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the step (inclusive).
    pub fn end(&self) -> NaiveDate {
        self.start + Days::new(u64::from(self.len_days() - 1))
    }

    /// Number of days covered by the step.
    pub fn len_days(&self) -> u32 {
        let month_len = days_in_month(self.start.year(), self.start.month());
        match self.cadence {
            Cadence::Daily => 1,
            Cadence::Dekad if self.start.day() == 21 => month_len - 20,
            Cadence::Dekad => 10,
            Cadence::Monthly => month_len,
        }
    }

    /// Middle day of the step (start + 4 days for a 10-day dekad).
    pub fn mid(&self) -> NaiveDate {
        self.start + Days::new(u64::from((self.len_days() - 1) / 2))
    }

    /// The step immediately following this one.
    pub fn next(&self) -> Self {
        Self {
            start: self.start + Days::new(u64::from(self.len_days())),
            cadence: self.cadence,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end()
    }

    /// Position of the step on an absolute axis of its cadence.
    pub fn ordinal(&self) -> i64 {
        let year = i64::from(self.start.year());
        let month0 = i64::from(self.start.month0());
        match self.cadence {
            Cadence::Daily => i64::from(self.start.num_days_from_ce()),
            Cadence::Dekad => year * DEKADS_PER_YEAR + month0 * 3 + i64::from(self.index() - 1),
            Cadence::Monthly => year * 12 + month0,
        }
    }

    /// Adds `n` steps (negative moves backwards). Returns `None` outside the
    /// supported calendar range.
    pub fn checked_add(&self, n: i64) -> Option<Self> {
        let ordinal = self.ordinal().checked_add(n)?;
        let start = match self.cadence {
            Cadence::Daily => NaiveDate::from_num_days_from_ce_opt(i32::try_from(ordinal).ok()?)?,
            Cadence::Dekad => {
                let year = i32::try_from(ordinal.div_euclid(DEKADS_PER_YEAR)).ok()?;
                let seq = ordinal.rem_euclid(DEKADS_PER_YEAR) as u32;
                NaiveDate::from_ymd_opt(year, seq / 3 + 1, (seq % 3) * 10 + 1)?
            }
            Cadence::Monthly => {
                let year = i32::try_from(ordinal.div_euclid(12)).ok()?;
                NaiveDate::from_ymd_opt(year, ordinal.rem_euclid(12) as u32 + 1, 1)?
            }
        };
        Some(Self {
            start,
            cadence: self.cadence,
        })
    }

    /// Number of steps from `other` to `self`. Both must share a cadence.
    pub fn diff(&self, other: &TimeStep) -> i64 {
        self.ordinal() - other.ordinal()
    }

    /// Steps of `cadence` whose period intersects this step, oldest first.
    pub fn overlapping(&self, cadence: Cadence) -> Vec<TimeStep> {
        let end = self.end();
        let mut cursor = TimeStep::containing(self.start, cadence);
        let mut steps = Vec::new();
        while cursor.start <= end {
            steps.push(cursor);
            cursor = cursor.next();
        }
        steps
    }

    /// Compact label of the first day, `yyyymmdd`.
    pub fn label(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for TimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cadence {
            Cadence::Daily => write!(f, "{}", self.start.format("%Y-%m-%d")),
            Cadence::Dekad => write!(f, "{}-d{}", self.start.format("%Y-%m"), self.index()),
            Cadence::Monthly => write!(f, "{}", self.start.format("%Y-%m")),
        }
    }
}

/// An inclusive, validated date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SeriesResult<Self> {
        if start > end {
            return Err(SeriesError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Generator of the ordered step list for a date range.
pub struct TimeGrid;

impl TimeGrid {
    /// All steps of `cadence` from the step containing `start` through the
    /// step containing `end`, strictly increasing and contiguous.
    pub fn generate(start: NaiveDate, end: NaiveDate, cadence: Cadence) -> SeriesResult<Vec<TimeStep>> {
        let range = DateRange::new(start, end)?;
        Ok(Self::for_range(&range, cadence))
    }

    pub fn for_range(range: &DateRange, cadence: Cadence) -> Vec<TimeStep> {
        let mut steps = Vec::new();
        let mut cursor = TimeStep::containing(range.start, cadence);
        while cursor.start <= range.end {
            steps.push(cursor);
            cursor = cursor.next();
        }
        steps
    }
}

/// Parse a calendar date given as `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_date(s: &str) -> SeriesResult<NaiveDate> {
    let trimmed = s.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| SeriesError::InvalidDate(s.to_string()))
}

fn dekad_of_month(day: u32) -> u32 {
    ((day - 1) / 10).min(2) + 1
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
