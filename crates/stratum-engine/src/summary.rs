use serde::Serialize;

use stratum_core::{ActionType, OpResult};

/// Per-run tally of terminal outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    pub fn record(&mut self, action: ActionType, result: OpResult) {
        match (result, action) {
            (OpResult::Failed, _) => self.failed += 1,
            (OpResult::Skip, _) => self.skipped += 1,
            (OpResult::Success, ActionType::Create) => self.created += 1,
            (OpResult::Success, ActionType::Update) => self.updated += 1,
            (OpResult::Success, ActionType::Delete) => self.deleted += 1,
            (OpResult::Success, _) => self.unchanged += 1,
            (OpResult::InProgress, _) => {}
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.unchanged + self.skipped + self.failed
    }

    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}
