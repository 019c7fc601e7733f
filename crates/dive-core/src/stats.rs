use crate::model::{Column, Row};
use crate::value::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Per-column statistics, tagged by the column type they were computed for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub key: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub summary: StatsSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsSummary {
    Numeric(NumericStats),
    Text(TextStats),
}

/// Extrema and moments are `None` when the column has no numeric values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_deviation: Option<f64>,
    pub total_count: u64,
    pub na_count: u64,
}

/// Lengths are `None` when the column has no non-null values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub total_count: u64,
    pub na_count: u64,
    pub unique_count: u64,
    pub max_length: Option<u64>,
    pub min_length: Option<u64>,
}

impl ColumnStats {
    pub fn total_count(&self) -> u64 {
        match &self.summary {
            StatsSummary::Numeric(s) => s.total_count,
            StatsSummary::Text(s) => s.total_count,
        }
    }

    pub fn na_count(&self) -> u64 {
        match &self.summary {
            StatsSummary::Numeric(s) => s.na_count,
            StatsSummary::Text(s) => s.na_count,
        }
    }
}

/// Compute stats for `column` over every row.
pub fn calculate_column_stats(column: &Column, rows: &[Row]) -> ColumnStats {
    calculate_values_stats(
        &column.key,
        column.column_type,
        rows.iter().map(|row| row.get(&column.key)),
    )
}

pub fn calculate_values_stats<'a>(
    key: &str,
    column_type: ColumnType,
    values: impl Iterator<Item = &'a Value>,
) -> ColumnStats {
    let summary = if column_type.is_numeric() {
        StatsSummary::Numeric(numeric_stats(values))
    } else {
        StatsSummary::Text(text_stats(values))
    };
    ColumnStats {
        key: key.to_string(),
        column_type,
        summary,
    }
}

fn numeric_stats<'a>(values: impl Iterator<Item = &'a Value>) -> NumericStats {
    let mut total_count = 0u64;
    let mut nums = Vec::new();
    for value in values {
        total_count += 1;
        // Non-numeric leftovers in a numeric column count as missing.
        if let Some(n) = value.as_f64() {
            nums.push(n);
        }
    }
    let na_count = total_count - nums.len() as u64;
    if nums.is_empty() {
        return NumericStats {
            total_count,
            na_count,
            ..NumericStats::default()
        };
    }

    nums.sort_by(f64::total_cmp);
    let n = nums.len() as f64;
    let mean = nums.iter().sum::<f64>() / n;
    let variance = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let mid = nums.len() / 2;
    let median = if nums.len() % 2 == 0 {
        (nums[mid - 1] + nums[mid]) / 2.0
    } else {
        nums[mid]
    };

    NumericStats {
        min: nums.first().copied(),
        max: nums.last().copied(),
        mean: Some(mean),
        median: Some(median),
        std_deviation: Some(variance.sqrt()),
        total_count,
        na_count,
    }
}

fn text_stats<'a>(values: impl Iterator<Item = &'a Value>) -> TextStats {
    let mut stats = TextStats::default();
    let mut distinct = HashSet::new();
    for value in values {
        stats.total_count += 1;
        let Some(text) = value.to_text() else {
            stats.na_count += 1;
            continue;
        };
        let len = text.chars().count() as u64;
        stats.max_length = Some(stats.max_length.map_or(len, |m| m.max(len)));
        stats.min_length = Some(stats.min_length.map_or(len, |m| m.min(len)));
        distinct.insert(text);
    }
    stats.unique_count = distinct.len() as u64;
    stats
}

/// Stats for `columns` after a change touching `affected` column keys.
///
/// Unaffected columns carry their previous stats forward untouched; affected
/// columns (and any column without usable previous stats) are recomputed over
/// the full row set.
pub fn recalculate_stats(
    previous: &[ColumnStats],
    rows: &[Row],
    columns: &[Column],
    affected: &[String],
) -> Vec<ColumnStats> {
    let previous: HashMap<&str, &ColumnStats> =
        previous.iter().map(|s| (s.key.as_str(), s)).collect();
    let affected: HashSet<&str> = affected.iter().map(String::as_str).collect();

    let mut recomputed = 0usize;
    let stats = columns
        .iter()
        .map(|column| {
            let carried = previous
                .get(column.key.as_str())
                .filter(|s| s.column_type == column.column_type);
            match carried {
                Some(stats) if !affected.contains(column.key.as_str()) => (*stats).clone(),
                _ => {
                    recomputed += 1;
                    calculate_column_stats(column, rows)
                }
            }
        })
        .collect();
    log::debug!(
        "recalculated stats for {recomputed} of {} columns over {} rows",
        columns.len(),
        rows.len()
    );
    stats
}
