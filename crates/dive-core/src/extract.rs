//! Extraction of an initial table state from a raw tabular source.

use crate::config::TableProperties;
use crate::model::{Column, Row};
use crate::stats::ColumnStats;
use crate::value::{parse_date, parse_datetime, ColumnType, Value};
use std::io::Read;
use thiserror::Error;

/// Rows, columns and optional stats seeding a table's first snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Extracted {
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    pub column_stats: Option<Vec<ColumnStats>>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("header row {header_level} is past the end of the source ({rows} rows)")]
    HeaderOutOfRange { header_level: usize, rows: usize },
}

pub trait Extractor {
    fn extract(
        &self,
        source: &mut dyn Read,
        properties: &TableProperties,
    ) -> Result<Extracted, ExtractionError>;
}

/// Delimited-text extractor with per-column type inference.
///
/// `timezone` and `language` are not interpreted: datetimes are read as naive
/// values and numbers use `.` as the decimal separator.
#[derive(Debug, Clone, Copy)]
pub struct CsvExtractor {
    pub delimiter: u8,
}

impl Default for CsvExtractor {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl Extractor for CsvExtractor {
    fn extract(
        &self,
        source: &mut dyn Read,
        properties: &TableProperties,
    ) -> Result<Extracted, ExtractionError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(source);

        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record?);
        }
        if records.len() <= properties.header_level {
            return Err(ExtractionError::HeaderOutOfRange {
                header_level: properties.header_level,
                rows: records.len(),
            });
        }
        let header = &records[properties.header_level];
        let data = &records[properties.header_level + 1..];
        let width = data.iter().map(|r| r.len()).chain([header.len()]).max().unwrap_or(0);

        let cell = |raw: Option<&str>| -> Option<String> {
            let raw = raw?;
            let is_na = raw.trim().is_empty()
                || properties.treat_these_as_na.as_deref() == Some(raw.trim());
            (!is_na).then(|| raw.to_string())
        };

        let mut columns = Vec::with_capacity(width);
        let mut cells: Vec<Vec<Option<String>>> = Vec::with_capacity(width);
        for i in 0..width {
            let values: Vec<Option<String>> = data.iter().map(|r| cell(r.get(i))).collect();
            let label = header
                .get(i)
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Column {}", i + 1));
            columns.push(Column::new(i.to_string(), label, infer_type(&values)));
            cells.push(values);
        }

        let rows = (0..data.len())
            .map(|r| {
                let mut row = Row::new(r.to_string());
                for (column, values) in columns.iter().zip(&cells) {
                    let value = match &values[r] {
                        None => Value::Null,
                        Some(raw) if column.column_type == ColumnType::String => {
                            if properties.trim_whitespaces {
                                Value::String(raw.trim().to_string())
                            } else {
                                Value::String(raw.clone())
                            }
                        }
                        Some(raw) => Value::from(raw.as_str()).parse_as(column.column_type),
                    };
                    row.set(column.key.clone(), value);
                }
                row
            })
            .collect();

        Ok(Extracted {
            rows,
            columns,
            column_stats: None,
        })
    }
}

/// Narrowest type every non-missing value parses as.
fn infer_type(values: &[Option<String>]) -> ColumnType {
    let present: Vec<&str> = values.iter().flatten().map(|s| s.trim()).collect();
    if present.is_empty() {
        return ColumnType::String;
    }
    if present.iter().all(|s| s.parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else if present
        .iter()
        .all(|s| s.parse::<f64>().is_ok_and(f64::is_finite))
    {
        ColumnType::Float
    } else if present.iter().all(|s| parse_date(s).is_some()) {
        if present.iter().all(|s| s.len() <= 10) {
            ColumnType::Date
        } else if present.iter().all(|s| parse_datetime(s).is_some()) {
            ColumnType::Datetime
        } else {
            ColumnType::String
        }
    } else {
        ColumnType::String
    }
}
