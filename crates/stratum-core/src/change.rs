use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// The planned action for one resource.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Create,
    Update,
    Delete,
    UnChange,
    /// Neither side present. Never produced by a well-formed plan.
    Undefined,
}

impl ActionType {
    /// One-character marker used in human-facing summaries.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::UnChange => "=",
            Self::Undefined => "?",
        }
    }

    pub fn is_change(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::UnChange => "UnChange",
            Self::Undefined => "Undefined",
        };
        f.write_str(name)
    }
}

/// One resource's planned transition from prior to planned state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeStep {
    pub id: String,
    pub action: ActionType,
    /// State before the change (from the prior state), if any.
    pub from: Option<Resource>,
    /// Desired state (from the spec), if any.
    pub to: Option<Resource>,
}

impl ChangeStep {
    pub fn new(
        id: impl Into<String>,
        action: ActionType,
        from: Option<Resource>,
        to: Option<Resource>,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            from,
            to,
        }
    }

    /// The resource the runtime acts on: planned for create/update,
    /// prior for delete.
    pub fn subject(&self) -> Option<&Resource> {
        match self.action {
            ActionType::Delete => self.from.as_ref(),
            _ => self.to.as_ref().or(self.from.as_ref()),
        }
    }

    /// Ids this step's resource declares a dependency on, from whichever
    /// side carries the relation.
    pub fn dependencies(&self) -> &[String] {
        match self.subject() {
            Some(resource) => &resource.depends_on,
            None => &[],
        }
    }
}

/// Full plan for one run: every step keyed by id, plus a display order.
///
/// `step_keys` is only a presentation hint; the executor derives execution
/// order from the dependency graph, not from this list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeOrder {
    pub step_keys: Vec<String>,
    pub change_steps: HashMap<String, ChangeStep>,
}

impl ChangeOrder {
    pub fn get(&self, id: &str) -> Option<&ChangeStep> {
        self.change_steps.get(id)
    }

    pub fn len(&self) -> usize {
        self.change_steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_steps.is_empty()
    }

    /// Steps in display order.
    pub fn steps(&self) -> impl Iterator<Item = &ChangeStep> {
        self.step_keys
            .iter()
            .filter_map(|key| self.change_steps.get(key))
    }

    pub fn count(&self, action: ActionType) -> usize {
        self.change_steps
            .values()
            .filter(|s| s.action == action)
            .count()
    }

    pub fn has_changes(&self) -> bool {
        self.change_steps.values().any(|s| s.action.is_change())
    }

    pub fn is_all_unchanged(&self) -> bool {
        self.change_steps
            .values()
            .all(|s| s.action == ActionType::UnChange)
    }
}

impl fmt::Display for ChangeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in self.steps() {
            writeln!(f, "  {} {} ({})", step.action.symbol(), step.id, step.action)?;
        }
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.count(ActionType::Create),
            self.count(ActionType::Update),
            self.count(ActionType::Delete),
            self.count(ActionType::UnChange),
        )
    }
}
