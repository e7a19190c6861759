//! Lenient date and timestamp parsing for temporal columns.
//!
//! Strings are tried against a fixed list of formats:
//!
//! 1. `2024-03-01 12:30:45` (fractional seconds allowed)
//! 2. `20240301123045`
//! 3. `2024-03-01`
//! 4. `12:30:45` (on 1970-01-01)
//! 5. `2024`
//! 6. the configured custom format, if any
//!
//! Integers are epoch offsets whose unit follows the digit count: 10 digits
//! seconds, 16 microseconds, 19 nanoseconds, fewer than 10 days, and
//! milliseconds for every other width.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sluice_rdbc::types::Value;
use thiserror::Error;

const STANDARD_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const COMPACT_FORMAT: &str = "%Y%m%d%H%M%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// A value that no format accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("can't parse date '{input}'")]
pub struct DateParseError {
    /// Offending input
    pub input: String,
}

impl DateParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Parser owned by one writer; immutable after construction
#[derive(Debug, Clone, Default)]
pub struct DateParser {
    custom_format: Option<String>,
}

fn epoch() -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc()
}

impl DateParser {
    /// Parser with an optional extra chrono format
    pub fn new(custom_format: Option<String>) -> Self {
        Self {
            custom_format: custom_format.filter(|f| !f.trim().is_empty()),
        }
    }

    /// The configured custom format
    pub fn custom_format(&self) -> Option<&str> {
        self.custom_format.as_deref()
    }

    /// Parse a string using the fixed format order
    pub fn parse_str(&self, input: &str) -> Result<NaiveDateTime, DateParseError> {
        let s = input.trim();

        if let Ok(dt) = NaiveDateTime::parse_from_str(s, STANDARD_FORMAT) {
            return Ok(dt);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, COMPACT_FORMAT) {
            return Ok(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
            return Ok(d.and_time(NaiveTime::MIN));
        }
        if let Ok(t) = NaiveTime::parse_from_str(s, TIME_FORMAT) {
            return Ok(epoch().date().and_time(t));
        }
        if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Some(d) = s
                .parse::<i32>()
                .ok()
                .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
            {
                return Ok(d.and_time(NaiveTime::MIN));
            }
        }
        if let Some(format) = &self.custom_format {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(dt);
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, format) {
                return Ok(d.and_time(NaiveTime::MIN));
            }
        }

        Err(DateParseError::new(input))
    }

    /// Interpret an integer as an epoch offset, unit chosen by digit count
    pub fn parse_epoch(&self, raw: i64) -> Result<NaiveDateTime, DateParseError> {
        let digits = raw.unsigned_abs().checked_ilog10().map_or(1, |d| d + 1);
        let base = epoch();
        let parsed = match digits {
            10 => base.checked_add_signed(Duration::seconds(raw)),
            16 => base.checked_add_signed(Duration::microseconds(raw)),
            19 => base.checked_add_signed(Duration::nanoseconds(raw)),
            d if d < 10 => Duration::try_days(raw).and_then(|days| base.checked_add_signed(days)),
            _ => base.checked_add_signed(Duration::milliseconds(raw)),
        };
        parsed.ok_or_else(|| DateParseError::new(raw.to_string()))
    }

    /// Timestamp for a record value; `None` for null and blank strings
    pub fn to_datetime(&self, value: &Value) -> Result<Option<NaiveDateTime>, DateParseError> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => self.parse_str(s).map(Some),
            Value::DateTime(dt) => Ok(Some(*dt)),
            Value::DateTimeTz(dt) => Ok(Some(dt.naive_utc())),
            Value::Date(d) => Ok(Some(d.and_time(NaiveTime::MIN))),
            Value::Time(t) => Ok(Some(epoch().date().and_time(*t))),
            Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => {
                let raw = value
                    .as_i64()
                    .ok_or_else(|| DateParseError::new(value.to_string()))?;
                self.parse_epoch(raw).map(Some)
            }
            Value::Decimal(_) | Value::Float32(_) | Value::Float64(_) => match value.as_i64() {
                Some(raw) => self.parse_epoch(raw).map(Some),
                None => Err(DateParseError::new(value.to_string())),
            },
            other => Err(DateParseError::new(other.to_string())),
        }
    }

    /// Date for a record value; time of day is dropped
    pub fn to_date(&self, value: &Value) -> Result<Option<NaiveDate>, DateParseError> {
        Ok(self.to_datetime(value)?.map(|dt| dt.date()))
    }
}
