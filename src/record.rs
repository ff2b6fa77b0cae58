//! Decoding of single log lines into typed records.
//!
//! Review and metadata files share one line format (one JSON object per line)
//! but carry different fields. Every field goes through a three-state
//! accessor so a caller can tell "not there" apart from "there but wrong".

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use simd_json::OwnedValue;
use simd_json::prelude::*;
use thiserror::Error;

use crate::types::Bucket;

/// Format of the `reviewTime` fallback field, e.g. `"09 13, 2009"`.
pub const REVIEW_DATE_FORMAT: &str = "%m %d, %Y";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid JSON record: {0}")]
    InvalidJson(String),
    #[error("record has neither `unixReviewTime` nor `reviewTime`")]
    MissingTimestamp,
    #[error("field `{field}` has an unexpected shape")]
    MalformedField { field: &'static str },
    #[error("unparsable date `{value}`")]
    InvalidDate { value: String },
}

/// Result of looking up one optional field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    Present(T),
    Absent,
    Malformed,
}

impl<T> Field<T> {
    /// `Absent` becomes `None`; `Malformed` is rejected as a record error.
    pub fn optional(self, field: &'static str) -> Result<Option<T>, RecordError> {
        match self {
            Field::Present(value) => Ok(Some(value)),
            Field::Absent => Ok(None),
            Field::Malformed => Err(RecordError::MalformedField { field }),
        }
    }
}

// AMAZON REVIEW / METADATA LINE SCHEMA

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "unixReviewTime")]
    unix_review_time: Option<OwnedValue>,
    #[serde(rename = "reviewTime")]
    review_time: Option<OwnedValue>,
    #[serde(rename = "reviewerID")]
    reviewer_id: Option<OwnedValue>,
    asin: Option<OwnedValue>,
    categories: Option<OwnedValue>,
    title: Option<OwnedValue>,
    description: Option<OwnedValue>,
}

impl RawRecord {
    fn decode(line: &mut [u8]) -> Result<Self, RecordError> {
        simd_json::from_slice::<RawRecord>(line).map_err(|e| RecordError::InvalidJson(e.to_string()))
    }
}

fn string_field(value: Option<&OwnedValue>) -> Field<String> {
    match value {
        None => Field::Absent,
        Some(v) if v.is_null() => Field::Absent,
        Some(v) => match v.as_str() {
            Some(s) => Field::Present(s.to_string()),
            None => Field::Malformed,
        },
    }
}

fn epoch_field(value: Option<&OwnedValue>) -> Field<i64> {
    match value {
        None => Field::Absent,
        Some(v) if v.is_null() => Field::Absent,
        Some(v) => match v.as_i64() {
            Some(secs) => Field::Present(secs),
            None => Field::Malformed,
        },
    }
}

fn categories_field(value: Option<&OwnedValue>) -> Field<Vec<Vec<String>>> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Field::Absent;
    };
    let Some(groups) = value.as_array() else {
        return Field::Malformed;
    };

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let Some(labels) = group.as_array() else {
            return Field::Malformed;
        };
        let mut path = Vec::with_capacity(labels.len());
        for label in labels {
            match label.as_str() {
                Some(s) => path.push(s.to_string()),
                None => return Field::Malformed,
            }
        }
        out.push(path);
    }
    Field::Present(out)
}

/// Parse the `reviewTime` fallback format into midnight UTC of that day.
pub fn parse_review_date(value: &str) -> Result<DateTime<Utc>, RecordError> {
    NaiveDate::parse_from_str(value.trim(), REVIEW_DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| RecordError::InvalidDate {
            value: value.to_string(),
        })
}

fn review_timestamp(raw: &RawRecord) -> Result<DateTime<Utc>, RecordError> {
    match epoch_field(raw.unix_review_time.as_ref()) {
        Field::Present(secs) => {
            Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| RecordError::InvalidDate {
                    value: secs.to_string(),
                })
        }
        Field::Malformed => Err(RecordError::MalformedField {
            field: "unixReviewTime",
        }),
        Field::Absent => match string_field(raw.review_time.as_ref()) {
            Field::Present(text) => parse_review_date(&text),
            Field::Absent => Err(RecordError::MissingTimestamp),
            Field::Malformed => Err(RecordError::MalformedField {
                field: "reviewTime",
            }),
        },
    }
}

/// Records that can be decoded from one physical line.
pub trait ParseRecord: Sized {
    fn parse(line: &mut [u8]) -> Result<Self, RecordError>;
}

/// One review. The timestamp is mandatory; identities may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRecord {
    pub reviewer_id: Option<String>,
    pub product_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ReviewRecord {
    pub fn bucket(&self) -> Bucket {
        Bucket::from_datetime(&self.timestamp)
    }

    pub fn user(&self) -> Option<&str> {
        self.reviewer_id.as_deref()
    }

    pub fn product(&self) -> Option<&str> {
        self.product_id.as_deref()
    }
}

impl ParseRecord for ReviewRecord {
    fn parse(line: &mut [u8]) -> Result<Self, RecordError> {
        let raw = RawRecord::decode(line)?;
        let timestamp = review_timestamp(&raw)?;
        Ok(Self {
            reviewer_id: string_field(raw.reviewer_id.as_ref()).optional("reviewerID")?,
            product_id: string_field(raw.asin.as_ref()).optional("asin")?,
            timestamp,
        })
    }
}

/// One product metadata entry. Metadata lines carry no timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductRecord {
    pub product_id: Option<String>,
    pub categories: Vec<Vec<String>>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl ProductRecord {
    pub fn product(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    /// Every category label across all category paths, in file order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().flatten().map(String::as_str)
    }
}

impl ParseRecord for ProductRecord {
    fn parse(line: &mut [u8]) -> Result<Self, RecordError> {
        let raw = RawRecord::decode(line)?;
        Ok(Self {
            product_id: string_field(raw.asin.as_ref()).optional("asin")?,
            categories: categories_field(raw.categories.as_ref())
                .optional("categories")?
                .unwrap_or_default(),
            title: string_field(raw.title.as_ref()).optional("title")?,
            description: string_field(raw.description.as_ref()).optional("description")?,
        })
    }
}
