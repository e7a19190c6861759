//! Per-column value coercion driven by the declared SQL type.
//!
//! Declared type names are resolved once into a [`ColumnType`] when the
//! writer opens; each record field is then converted with
//! [`ColumnType::coerce`] before binding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sluice_rdbc::types::Value;

use crate::datetime::DateParser;
use crate::error::{ErrorKind, RecordError};

/// Type names whose columns keep blank strings instead of turning them into NULL
pub const STRING_TYPES: &[&str] = &[
    "CHAR",
    "VARCHAR",
    "VARCHAR2",
    "NVARCHAR2",
    "NVARCHAR",
    "TINYBLOB",
    "TINYTEXT",
    "BLOB",
    "TEXT",
    "MEDIUMBLOB",
    "MEDIUMTEXT",
    "LONGBLOB",
    "LONGTEXT",
    "CHARACTER VARYING",
    "CHARACTER",
    "BPCHAR",
    "STRING",
];

/// Coercion class of a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Character and text types
    Text,
    /// DATE
    Date,
    /// TIME
    Time,
    /// DATETIME / TIMESTAMP without zone
    Timestamp,
    /// TIMESTAMP WITH TIME ZONE
    TimestampTz,
    /// TINYINT / SMALLINT
    SmallInt,
    /// INT / INTEGER / MEDIUMINT
    Int,
    /// BIGINT; temporal values become epoch milliseconds
    BigInt,
    /// REAL / FLOAT4
    Real,
    /// DOUBLE / FLOAT
    Double,
    /// DECIMAL / NUMERIC
    Decimal,
    /// BOOLEAN / BIT
    Boolean,
    /// Anything else is passed through untouched
    Other,
}

/// Upper-case the type name and drop any length/precision suffix
fn normalize(declared: &str) -> String {
    let base = match declared.find('(') {
        Some(idx) => {
            let tail = declared[idx..]
                .find(')')
                .map(|end| &declared[idx + end + 1..])
                .unwrap_or("");
            format!("{}{}", &declared[..idx], tail)
        }
        None => declared.to_string(),
    };
    base.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

impl ColumnType {
    /// Resolve a declared type name
    pub fn from_declared(declared: &str) -> Self {
        let name = normalize(declared);
        let name = name.trim_end_matches(" UNSIGNED");

        if STRING_TYPES.contains(&name) {
            return Self::Text;
        }

        match name {
            "DATE" => Self::Date,
            "TIME" | "TIME WITHOUT TIME ZONE" => Self::Time,
            "DATETIME" | "DATETIME2" | "SMALLDATETIME" => Self::Timestamp,
            "TIMESTAMPTZ" | "DATETIMEOFFSET" => Self::TimestampTz,
            n if n.starts_with("TIMESTAMP") => {
                if n.ends_with("WITH TIME ZONE") && !n.ends_with("WITHOUT TIME ZONE") {
                    Self::TimestampTz
                } else {
                    Self::Timestamp
                }
            }
            "TINYINT" | "SMALLINT" | "INT2" | "SMALLSERIAL" => Self::SmallInt,
            "INT" | "INTEGER" | "INT4" | "MEDIUMINT" | "SERIAL" => Self::Int,
            "BIGINT" | "INT8" | "BIGSERIAL" => Self::BigInt,
            "REAL" | "FLOAT4" => Self::Real,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" | "BINARY_DOUBLE" => Self::Double,
            "DECIMAL" | "NUMERIC" | "NUMBER" | "MONEY" => Self::Decimal,
            "BOOLEAN" | "BOOL" | "BIT" => Self::Boolean,
            _ => Self::Other,
        }
    }

    /// Whether blank strings are kept as values
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text)
    }

    /// Convert a record value for binding to a column of this type
    pub fn coerce(self, value: &Value, dates: &DateParser) -> Result<Value, RecordError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if value.is_blank_string() && !self.is_textual() {
            return Ok(Value::Null);
        }

        let fail = |target: &str| {
            RecordError::new(
                ErrorKind::Conversion,
                format!("cannot convert '{}' to {}", value, target),
            )
        };
        let date_err = |e: crate::datetime::DateParseError| RecordError::new(ErrorKind::Conversion, e.to_string());

        match self {
            Self::Text => match value {
                Value::String(_) | Value::Bytes(_) => Ok(value.clone()),
                other => Ok(Value::String(other.to_string())),
            },
            Self::Date => Ok(dates
                .to_date(value)
                .map_err(date_err)?
                .map_or(Value::Null, Value::Date)),
            Self::Time => match value {
                Value::Time(_) => Ok(value.clone()),
                _ => Ok(dates
                    .to_datetime(value)
                    .map_err(date_err)?
                    .map_or(Value::Null, |dt| Value::Time(dt.time()))),
            },
            Self::Timestamp => Ok(dates
                .to_datetime(value)
                .map_err(date_err)?
                .map_or(Value::Null, Value::DateTime)),
            Self::TimestampTz => match value {
                Value::DateTimeTz(_) => Ok(value.clone()),
                _ => Ok(dates
                    .to_datetime(value)
                    .map_err(date_err)?
                    .map_or(Value::Null, |dt| Value::DateTimeTz(dt.and_utc()))),
            },
            Self::BigInt if value.is_temporal() => Ok(dates
                .to_datetime(value)
                .map_err(date_err)?
                .map_or(Value::Null, |dt| {
                    Value::Int64(dt.and_utc().timestamp_millis())
                })),
            Self::SmallInt => {
                let n = integral(value).ok_or_else(|| fail("SMALLINT"))?;
                i16::try_from(n)
                    .map(Value::Int16)
                    .map_err(|_| fail("SMALLINT"))
            }
            Self::Int => {
                let n = integral(value).ok_or_else(|| fail("INTEGER"))?;
                i32::try_from(n).map(Value::Int32).map_err(|_| fail("INTEGER"))
            }
            Self::BigInt => integral(value).map(Value::Int64).ok_or_else(|| fail("BIGINT")),
            Self::Real => numeric(value)
                .map(|f| Value::Float32(f as f32))
                .ok_or_else(|| fail("REAL")),
            Self::Double => numeric(value)
                .map(Value::Float64)
                .ok_or_else(|| fail("DOUBLE")),
            Self::Decimal => decimal(value).map(Value::Decimal).ok_or_else(|| fail("DECIMAL")),
            Self::Boolean => value.as_bool().map(Value::Bool).ok_or_else(|| fail("BOOLEAN")),
            Self::Other => Ok(value.clone()),
        }
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<Decimal>()
                        .ok()
                        .filter(|d| d.fract().is_zero())
                        .and_then(|d| d.to_i64())
                })
        }
        other => other.as_i64(),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        Value::String(s) => s.trim().parse().ok(),
        Value::Float32(f) => Decimal::try_from(f64::from(*f)).ok(),
        Value::Float64(f) => Decimal::try_from(*f).ok(),
        other => other.as_i64().map(Decimal::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_from_declared() {
        assert_eq!(ColumnType::from_declared("varchar(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("character varying"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("bpchar"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("date"), ColumnType::Date);
        assert_eq!(ColumnType::from_declared("DATETIME"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_declared("datetime2(7)"), ColumnType::Timestamp);
        assert_eq!(
            ColumnType::from_declared("timestamp without time zone"),
            ColumnType::Timestamp
        );
        assert_eq!(
            ColumnType::from_declared("timestamp(3) with time zone"),
            ColumnType::TimestampTz
        );
        assert_eq!(ColumnType::from_declared("bigint"), ColumnType::BigInt);
        assert_eq!(ColumnType::from_declared("int unsigned"), ColumnType::Int);
        assert_eq!(ColumnType::from_declared("numeric(10,2)"), ColumnType::Decimal);
        assert_eq!(ColumnType::from_declared("double precision"), ColumnType::Double);
        assert_eq!(ColumnType::from_declared("boolean"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_declared("uuid"), ColumnType::Other);
    }

    #[test]
    fn test_blank_strings() {
        let dates = DateParser::default();
        let blank = Value::from("  ");
        assert_eq!(ColumnType::Int.coerce(&blank, &dates).unwrap(), Value::Null);
        assert_eq!(ColumnType::Date.coerce(&blank, &dates).unwrap(), Value::Null);
        assert_eq!(ColumnType::Other.coerce(&blank, &dates).unwrap(), Value::Null);
        assert_eq!(ColumnType::Text.coerce(&blank, &dates).unwrap(), blank);
    }

    #[test]
    fn test_temporal() {
        let dates = DateParser::default();
        assert_eq!(
            ColumnType::Date
                .coerce(&Value::from("2024-03-01 10:00:00"), &dates)
                .unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            ColumnType::Timestamp
                .coerce(&Value::from("20240301100000"), &dates)
                .unwrap(),
            Value::DateTime(ts("2024-03-01 10:00:00"))
        );
        assert_eq!(
            ColumnType::BigInt
                .coerce(&Value::DateTime(ts("1970-01-01 00:00:01")), &dates)
                .unwrap(),
            Value::Int64(1000)
        );
        let err = ColumnType::Timestamp
            .coerce(&Value::from("garbage"), &dates)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conversion);
    }

    #[test]
    fn test_numeric() {
        let dates = DateParser::default();
        assert_eq!(
            ColumnType::Int.coerce(&Value::from(" 42 "), &dates).unwrap(),
            Value::Int32(42)
        );
        assert_eq!(
            ColumnType::BigInt.coerce(&Value::Int32(7), &dates).unwrap(),
            Value::Int64(7)
        );
        assert_eq!(
            ColumnType::SmallInt.coerce(&Value::from("1.0"), &dates).unwrap(),
            Value::Int16(1)
        );
        assert!(ColumnType::SmallInt.coerce(&Value::Int64(70_000), &dates).is_err());
        assert!(ColumnType::Int.coerce(&Value::from("abc"), &dates).is_err());
        assert_eq!(
            ColumnType::Decimal.coerce(&Value::from("12.50"), &dates).unwrap(),
            Value::Decimal("12.50".parse().unwrap())
        );
        assert_eq!(
            ColumnType::Double.coerce(&Value::from("2.5"), &dates).unwrap(),
            Value::Float64(2.5)
        );
        assert_eq!(
            ColumnType::Boolean.coerce(&Value::from("true"), &dates).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_text_stringifies() {
        let dates = DateParser::default();
        assert_eq!(
            ColumnType::Text.coerce(&Value::Int64(5), &dates).unwrap(),
            Value::from("5")
        );
        assert_eq!(
            ColumnType::Other.coerce(&Value::Int64(5), &dates).unwrap(),
            Value::Int64(5)
        );
    }
}
