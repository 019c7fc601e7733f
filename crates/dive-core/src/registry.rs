use crate::action::{Action, ActionKind};
use crate::model::Column;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("action {0} is already registered")]
    Duplicate(&'static str),
}

/// Immutable name → action kind mapping, built once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRegistry {
    kinds: BTreeMap<&'static str, ActionKind>,
}

#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    kinds: BTreeMap<&'static str, ActionKind>,
}

impl ActionRegistryBuilder {
    pub fn register(mut self, kind: ActionKind) -> Result<Self, RegistryError> {
        if self.kinds.insert(kind.name(), kind).is_some() {
            return Err(RegistryError::Duplicate(kind.name()));
        }
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry { kinds: self.kinds }
    }
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Registry with every built-in action kind.
    pub fn standard() -> Self {
        Self {
            kinds: ActionKind::ALL.iter().map(|k| (k.name(), *k)).collect(),
        }
    }

    /// Unregistered names yield `None`.
    pub fn lookup(&self, name: &str) -> Option<ActionKind> {
        self.kinds.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }

    /// Build an action from its stored name and raw parameters.
    pub fn parse(&self, name: &str, parameters: Vec<String>, columns: Option<&[Column]>) -> Option<Action> {
        self.lookup(name)
            .map(|kind| Action::new(kind, parameters, columns))
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
