//! Named, parameterized table transformations.
//!
//! Every action kind declares a parameter schema and two pure operations:
//! a column-level effect and a per-row effect. Validation happens when an
//! [`Action`] is built; an invalid action can still be inspected but refuses
//! to run.

use crate::error::ActionError;
use crate::model::{Column, Row};
use crate::value::{ColumnType, ParseColumnTypeError, Value};

/// Primitive type of a single action parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    /// Key of a column in the table's projected column set.
    ColumnKey,
    /// Name of a [`ColumnType`].
    ColumnType,
    /// Free text.
    Text,
}

impl ParamType {
    fn check(self, raw: &str) -> Result<(), String> {
        match self {
            ParamType::ColumnKey if raw.is_empty() => Err("column key is empty".to_string()),
            ParamType::ColumnKey | ParamType::Text => Ok(()),
            ParamType::ColumnType => raw.parse::<ColumnType>().map(|_| ()).map_err(|e| e.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CastColumn,
    RenameColumn,
    FillNull,
    TrimWhitespace,
}

impl ActionKind {
    pub const ALL: &'static [ActionKind] = &[
        ActionKind::CastColumn,
        ActionKind::RenameColumn,
        ActionKind::FillNull,
        ActionKind::TrimWhitespace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::CastColumn => "cast_column",
            ActionKind::RenameColumn => "rename_column",
            ActionKind::FillNull => "fill_null",
            ActionKind::TrimWhitespace => "trim_whitespace",
        }
    }

    pub fn param_types(self) -> &'static [ParamType] {
        match self {
            ActionKind::CastColumn => &[ParamType::ColumnKey, ParamType::ColumnType],
            ActionKind::RenameColumn => &[ParamType::ColumnKey, ParamType::Text],
            ActionKind::FillNull => &[ParamType::ColumnKey, ParamType::Text],
            ActionKind::TrimWhitespace => &[],
        }
    }
}

/// Validated, structured parameters of an action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionParams {
    CastColumn { column: String, target: ColumnType },
    RenameColumn { column: String, label: String },
    FillNull { column: String, replacement: Value },
    TrimWhitespace,
}

impl ActionParams {
    /// The column this action targets, if it targets a single one.
    pub fn column(&self) -> Option<&str> {
        match self {
            ActionParams::CastColumn { column, .. }
            | ActionParams::RenameColumn { column, .. }
            | ActionParams::FillNull { column, .. } => Some(column),
            ActionParams::TrimWhitespace => None,
        }
    }
}

/// Column-level effect of a transform.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnEffect {
    pub columns: Vec<Column>,
    /// Keys whose data or type changed, in first-touched order.
    pub affected: Vec<String>,
}

/// Shared surface of single and composed actions.
pub trait Transform {
    fn is_valid(&self) -> bool;

    fn error(&self) -> Option<&ActionError>;

    fn apply_columns(&self, columns: &[Column]) -> Result<ColumnEffect, ActionError>;

    fn apply_row(&self, row: Row) -> Result<Row, ActionError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    kind: ActionKind,
    parameters: Vec<String>,
    validated: Result<ActionParams, ActionError>,
}

impl Action {
    /// Build and validate an action against the table's projected columns.
    ///
    /// `columns` is `None` when the table has no snapshot yet.
    pub fn new(kind: ActionKind, parameters: Vec<String>, columns: Option<&[Column]>) -> Self {
        let validated = validate(kind, &parameters, columns);
        Self {
            kind,
            parameters,
            validated,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn params(&self) -> Option<&ActionParams> {
        self.validated.as_ref().ok()
    }

    fn valid_params(&self) -> Result<&ActionParams, ActionError> {
        self.validated.as_ref().map_err(|_| ActionError::NotValid)
    }
}

fn validate(
    kind: ActionKind,
    parameters: &[String],
    columns: Option<&[Column]>,
) -> Result<ActionParams, ActionError> {
    let schema = kind.param_types();
    if parameters.len() != schema.len() {
        return Err(ActionError::InvalidParameters {
            index: parameters.len().min(schema.len()),
            reason: format!(
                "expected {} parameters, got {}",
                schema.len(),
                parameters.len()
            ),
        });
    }
    for (index, (raw, ty)) in parameters.iter().zip(schema).enumerate() {
        ty.check(raw)
            .map_err(|reason| ActionError::InvalidParameters { index, reason })?;
    }

    for (raw, ty) in parameters.iter().zip(schema) {
        if *ty == ParamType::ColumnKey {
            find_column(columns, raw)?;
        }
    }

    match kind {
        ActionKind::CastColumn => Ok(ActionParams::CastColumn {
            column: parameters[0].clone(),
            target: parameters[1]
                .parse()
                .map_err(|e: ParseColumnTypeError| ActionError::InvalidParameters {
                    index: 1,
                    reason: e.to_string(),
                })?,
        }),
        ActionKind::RenameColumn => Ok(ActionParams::RenameColumn {
            column: parameters[0].clone(),
            label: parameters[1].clone(),
        }),
        ActionKind::FillNull => {
            let column = find_column(columns, &parameters[0])?;
            let replacement = Value::from(parameters[1].as_str()).parse_as(column.column_type);
            if replacement.is_null() {
                return Err(ActionError::InvalidParameters {
                    index: 1,
                    reason: format!(
                        "'{}' is not a valid {} value",
                        parameters[1], column.column_type
                    ),
                });
            }
            Ok(ActionParams::FillNull {
                column: column.key.clone(),
                replacement,
            })
        }
        ActionKind::TrimWhitespace => Ok(ActionParams::TrimWhitespace),
    }
}

fn find_column<'a>(columns: Option<&'a [Column]>, key: &str) -> Result<&'a Column, ActionError> {
    columns
        .ok_or(ActionError::MissingSnapshot)?
        .iter()
        .find(|c| c.key == key)
        .ok_or_else(|| ActionError::UnknownColumn {
            column: key.to_string(),
        })
}

impl Transform for Action {
    fn is_valid(&self) -> bool {
        self.validated.is_ok()
    }

    fn error(&self) -> Option<&ActionError> {
        self.validated.as_ref().err()
    }

    fn apply_columns(&self, columns: &[Column]) -> Result<ColumnEffect, ActionError> {
        let params = self.valid_params()?;
        let mut columns = columns.to_vec();
        let affected = match params {
            ActionParams::CastColumn { column, target } => {
                for col in columns.iter_mut().filter(|c| &c.key == column) {
                    col.column_type = *target;
                }
                vec![column.clone()]
            }
            ActionParams::RenameColumn { column, label } => {
                for col in columns.iter_mut().filter(|c| &c.key == column) {
                    col.label = label.clone();
                }
                Vec::new()
            }
            ActionParams::FillNull { column, .. } => vec![column.clone()],
            ActionParams::TrimWhitespace => columns
                .iter()
                .filter(|c| c.column_type == ColumnType::String)
                .map(|c| c.key.clone())
                .collect(),
        };
        Ok(ColumnEffect { columns, affected })
    }

    fn apply_row(&self, mut row: Row) -> Result<Row, ActionError> {
        match self.valid_params()? {
            ActionParams::CastColumn { column, target } => {
                let parsed = row.get(column).parse_as(*target);
                row.set(column.clone(), parsed);
            }
            ActionParams::RenameColumn { .. } => {}
            ActionParams::FillNull {
                column,
                replacement,
            } => {
                if row.get(column).is_null() {
                    row.set(column.clone(), replacement.clone());
                }
            }
            ActionParams::TrimWhitespace => {
                for value in row.values.values_mut() {
                    if let Value::String(s) = value {
                        let trimmed = s.trim();
                        if trimmed.len() != s.len() {
                            *s = trimmed.to_string();
                        }
                    }
                }
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("0", "Id", ColumnType::Integer),
            Column::new("1", "Name", ColumnType::String),
        ]
    }

    fn params(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cast_with_unknown_column_is_invalid() {
        let cols = columns();
        let action = Action::new(ActionKind::CastColumn, params(&["random_col", "string"]), Some(cols.as_slice()));
        assert!(!action.is_valid());
        assert_eq!(
            action.error(),
            Some(&ActionError::UnknownColumn {
                column: "random_col".to_string()
            })
        );
        assert!(!action.error().unwrap().to_string().is_empty());
        let row = Row::new("0").with("0", 1);
        assert_eq!(action.apply_row(row), Err(ActionError::NotValid));
        assert_eq!(action.apply_columns(&cols), Err(ActionError::NotValid));
    }

    #[test]
    fn arity_and_type_errors_report_index() {
        let cols = columns();
        let action = Action::new(ActionKind::CastColumn, params(&["0"]), Some(cols.as_slice()));
        assert!(matches!(
            action.error(),
            Some(ActionError::InvalidParameters { index: 1, .. })
        ));

        let action = Action::new(ActionKind::CastColumn, params(&["0", "location"]), Some(cols.as_slice()));
        assert!(matches!(
            action.error(),
            Some(ActionError::InvalidParameters { index: 1, .. })
        ));

        let action = Action::new(ActionKind::CastColumn, params(&["", "string"]), Some(cols.as_slice()));
        assert!(matches!(
            action.error(),
            Some(ActionError::InvalidParameters { index: 0, .. })
        ));
    }

    #[test]
    fn type_errors_win_over_column_errors() {
        let cols = columns();
        let action = Action::new(ActionKind::CastColumn, params(&["missing", "location"]), Some(cols.as_slice()));
        assert!(matches!(
            action.error(),
            Some(ActionError::InvalidParameters { index: 1, .. })
        ));
    }

    #[test]
    fn column_actions_need_a_snapshot() {
        let action = Action::new(ActionKind::CastColumn, params(&["0", "string"]), None);
        assert_eq!(action.error(), Some(&ActionError::MissingSnapshot));

        let trim = Action::new(ActionKind::TrimWhitespace, Vec::new(), None);
        assert!(trim.is_valid());
        assert_eq!(trim.params().and_then(ActionParams::column), None);
    }

    #[test]
    fn cast_rewrites_row_and_column_type() {
        let cols = columns();
        let action = Action::new(ActionKind::CastColumn, params(&["0", "string"]), Some(cols.as_slice()));
        assert!(action.is_valid());

        let row = action.apply_row(Row::new("0").with("0", 1).with("1", "Sam")).unwrap();
        assert_eq!(row, Row::new("0").with("0", "1").with("1", "Sam"));

        let effect = action.apply_columns(&cols).unwrap();
        assert_eq!(effect.columns[0].column_type, ColumnType::String);
        assert_eq!(effect.columns[1], cols[1]);
        assert_eq!(effect.affected, vec!["0".to_string()]);
    }

    #[test]
    fn cast_twice_matches_cast_once() {
        let cols = columns();
        let action = Action::new(ActionKind::CastColumn, params(&["1", "integer"]), Some(cols.as_slice()));
        let row = Row::new("0").with("1", " 12 ");
        let once = action.apply_row(row.clone()).unwrap();
        let twice = action.apply_row(once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.get("1"), &Value::Integer(12));
    }

    #[test]
    fn rename_touches_label_only() {
        let cols = columns();
        let action = Action::new(ActionKind::RenameColumn, params(&["1", "Full name"]), Some(cols.as_slice()));
        let effect = action.apply_columns(&cols).unwrap();
        assert_eq!(effect.columns[1].label, "Full name");
        assert_eq!(effect.columns[1].key, "1");
        assert!(effect.affected.is_empty());
    }

    #[test]
    fn fill_null_parses_replacement_into_column_type() {
        let cols = columns();
        let action = Action::new(ActionKind::FillNull, params(&["0", "7"]), Some(cols.as_slice()));
        assert_eq!(
            action.params(),
            Some(&ActionParams::FillNull {
                column: "0".to_string(),
                replacement: Value::Integer(7),
            })
        );
        let row = action.apply_row(Row::new("0")).unwrap();
        assert_eq!(row.get("0"), &Value::Integer(7));
        let kept = action.apply_row(Row::new("1").with("0", 3)).unwrap();
        assert_eq!(kept.get("0"), &Value::Integer(3));

        let bad = Action::new(ActionKind::FillNull, params(&["0", "seven"]), Some(cols.as_slice()));
        assert!(matches!(
            bad.error(),
            Some(ActionError::InvalidParameters { index: 1, .. })
        ));
    }

    #[test]
    fn trim_whitespace_affects_string_columns() {
        let cols = columns();
        let action = Action::new(ActionKind::TrimWhitespace, Vec::new(), Some(cols.as_slice()));
        let effect = action.apply_columns(&cols).unwrap();
        assert_eq!(effect.affected, vec!["1".to_string()]);
        let row = action.apply_row(Row::new("0").with("0", 1).with("1", "  Sam ")).unwrap();
        assert_eq!(row.get("1"), &Value::from("Sam"));
        assert_eq!(row.get("0"), &Value::Integer(1));
    }
}
