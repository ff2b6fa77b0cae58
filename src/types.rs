use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// A calendar month, the unit of temporal aggregation.
///
/// Field order matters: the derived `Ord` compares `year` first, then `month`.
/// Serialized as `"YYYY-MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Bucket {
    pub year: i32,
    pub month: u32,
}

impl Bucket {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            anyhow::bail!("Invalid month {month} for year {year}");
        }
        Ok(Self { year, month })
    }

    pub fn from_datetime(date: &DateTime<Utc>) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The following calendar month.
    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Signed number of months from `origin` to `self`.
    pub fn months_since(&self, origin: &Bucket) -> i64 {
        (self.year as i64 - origin.year as i64) * 12 + (self.month as i64 - origin.month as i64)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Bucket {
    type Err = anyhow::Error;

    /// Accepts `YYYY-MM` or a full `YYYY-MM-DD` date (the day is ignored).
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('-');
        let year = parts
            .next()
            .and_then(|p| p.parse::<i32>().ok())
            .with_context(|| format!("Invalid year in bucket '{s}'"))?;
        let month = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .with_context(|| format!("Invalid month in bucket '{s}'"))?;
        Bucket::new(year, month)
    }
}

impl From<Bucket> for String {
    fn from(bucket: Bucket) -> Self {
        bucket.to_string()
    }
}

impl TryFrom<String> for Bucket {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Half-open `[from, to)` range of buckets exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingWindow {
    pub from: Bucket,
    pub to: Bucket,
}

impl ReportingWindow {
    pub fn new(from: Bucket, to: Bucket) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, bucket: &Bucket) -> bool {
        *bucket >= self.from && *bucket < self.to
    }
}

impl Default for ReportingWindow {
    fn default() -> Self {
        Self {
            from: Bucket {
                year: 2003,
                month: 1,
            },
            to: Bucket {
                year: 2014,
                month: 7,
            },
        }
    }
}

/// Column selector for deriving ratios from a materialized series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    New,
    Active,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub bucket: Bucket,
    pub new: u64,
    pub active: u64,
    pub total: u64,
}

impl SeriesRow {
    pub fn get(&self, column: Column) -> u64 {
        match column {
            Column::New => self.new,
            Column::Active => self.active,
            Column::Total => self.total,
        }
    }
}

/// Chronologically ordered, gap-filled rows with a running `total` of `new`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedSeries {
    pub rows: Vec<SeriesRow>,
}

impl MaterializedSeries {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn truncate(&self, window: &ReportingWindow) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|row| window.contains(&row.bucket))
                .copied()
                .collect(),
        }
    }

    /// Value of `column` at any bucket, inside the series or not. Before the
    /// first row everything is 0; past the last row only `Total` persists.
    pub fn value_at(&self, bucket: &Bucket, column: Column) -> u64 {
        if let Some(row) = self.get(bucket) {
            return row.get(column);
        }
        match (self.rows.last(), column) {
            (Some(last), Column::Total) if *bucket > last.bucket => last.total,
            _ => 0,
        }
    }

    pub fn get(&self, bucket: &Bucket) -> Option<&SeriesRow> {
        self.rows
            .binary_search_by(|row| row.bucket.cmp(bucket))
            .ok()
            .map(|idx| &self.rows[idx])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendRow {
    pub bucket: Bucket,
    /// `None` where the denominator was zero or the ratio is otherwise undefined.
    pub ratio: Option<f64>,
    /// Smoothed value from the regression, when one was fitted.
    pub fitted: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub rows: Vec<TrendRow>,
}

impl TrendSeries {
    pub fn truncate(&self, window: &ReportingWindow) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|row| window.contains(&row.bucket))
                .copied()
                .collect(),
        }
    }

    pub fn ratios(&self) -> Vec<(Bucket, Option<f64>)> {
        self.rows.iter().map(|row| (row.bucket, row.ratio)).collect()
    }
}
