use crate::action::{Action, ColumnEffect, Transform};
use crate::error::ActionError;
use crate::model::{Column, Row};

/// Ordered chain of actions applied as one transform in a single pass.
///
/// Actions run left to right; callers hand them over in ascending `order`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComposedAction {
    actions: Vec<Action>,
}

pub fn compose(actions: impl IntoIterator<Item = Action>) -> ComposedAction {
    ComposedAction {
        actions: actions.into_iter().collect(),
    }
}

impl ComposedAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn then(mut self, action: Action) -> Self {
        self.push(action);
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Transform for ComposedAction {
    fn is_valid(&self) -> bool {
        self.actions.iter().all(Transform::is_valid)
    }

    fn error(&self) -> Option<&ActionError> {
        self.actions.iter().find_map(Transform::error)
    }

    fn apply_columns(&self, columns: &[Column]) -> Result<ColumnEffect, ActionError> {
        if !self.is_valid() {
            return Err(ActionError::NotValid);
        }
        let mut effect = ColumnEffect {
            columns: columns.to_vec(),
            affected: Vec::new(),
        };
        for action in &self.actions {
            let step = action.apply_columns(&effect.columns)?;
            effect.columns = step.columns;
            for key in step.affected {
                if !effect.affected.contains(&key) {
                    effect.affected.push(key);
                }
            }
        }
        Ok(effect)
    }

    fn apply_row(&self, row: Row) -> Result<Row, ActionError> {
        if !self.is_valid() {
            return Err(ActionError::NotValid);
        }
        self.actions
            .iter()
            .try_fold(row, |row, action| action.apply_row(row))
    }
}
