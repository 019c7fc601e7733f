use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Declared type of a table column.
///
/// The type decides how cells are parsed when a column is cast and which
/// statistics strategy applies to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    #[serde(alias = "floating", alias = "number")]
    Float,
    Date,
    Datetime,
}

impl ColumnType {
    pub const ALL: &'static [ColumnType] = &[
        ColumnType::String,
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Date,
        ColumnType::Datetime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
        }
    }

    /// Numeric columns get min/max/mean style statistics, everything else is
    /// summarized by its textual form.
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported column type '{0}'")]
pub struct ParseColumnTypeError(pub String);

impl FromStr for ColumnType {
    type Err = ParseColumnTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ColumnType::String),
            "integer" => Ok(ColumnType::Integer),
            "float" | "floating" | "number" => Ok(ColumnType::Float),
            "date" => Ok(ColumnType::Date),
            "datetime" => Ok(ColumnType::Datetime),
            other => Err(ParseColumnTypeError(other.to_string())),
        }
    }
}

/// A single cell value.
///
/// Serialized with an explicit `{type, value}` layout so dates and datetimes
/// survive a JSON round trip without being mistaken for strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Strings are not coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Textual form of a non-null value.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Re-parse the value into `target`.
    ///
    /// Parsing is total: anything that cannot be represented in the target
    /// type becomes [`Value::Null`].
    pub fn parse_as(&self, target: ColumnType) -> Value {
        if self.is_null() {
            return Value::Null;
        }
        match target {
            ColumnType::String => match self {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            },
            ColumnType::Integer => match self {
                Value::Integer(i) => Value::Integer(*i),
                Value::Float(f) => float_to_integer(*f),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
            ColumnType::Float => match self {
                Value::Integer(i) => Value::Float(*i as f64),
                Value::Float(f) => Value::Float(*f),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::Float(f),
                    _ => Value::Null,
                },
                _ => Value::Null,
            },
            ColumnType::Date => match self {
                Value::Date(d) => Value::Date(*d),
                Value::Datetime(dt) => Value::Date(dt.date()),
                Value::String(s) => parse_date(s).map(Value::Date).unwrap_or(Value::Null),
                _ => Value::Null,
            },
            ColumnType::Datetime => match self {
                Value::Datetime(dt) => Value::Datetime(*dt),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(Value::Datetime)
                    .unwrap_or(Value::Null),
                Value::String(s) => parse_datetime(s)
                    .map(Value::Datetime)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }
}

fn float_to_integer(f: f64) -> Value {
    // `i64::MAX as f64` rounds up, so the upper bound is exclusive.
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Value::Integer(f.trunc() as i64)
    } else {
        Value::Null
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

pub(crate) fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Datetime(dt) => write!(f, "{dt}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
