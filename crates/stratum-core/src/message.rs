use serde::{Deserialize, Serialize};

use crate::change::ActionType;

/// Progress of one resource within a run.
///
/// `InProgress` serializes as the empty string: a resource has been picked
/// up but has not reached a terminal state yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    #[serde(rename = "")]
    InProgress,
    Success,
    Failed,
    Skip,
}

impl OpResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Progress event emitted by the executor for a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub resource_id: String,
    pub action: ActionType,
    pub op_result: OpResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_err: Option<String>,
    pub timestamp: jiff::Timestamp,
}

impl Message {
    pub fn new(resource_id: impl Into<String>, action: ActionType, op_result: OpResult) -> Self {
        Self {
            resource_id: resource_id.into(),
            action,
            op_result,
            op_err: None,
            timestamp: jiff::Timestamp::now(),
        }
    }

    pub fn in_progress(resource_id: impl Into<String>, action: ActionType) -> Self {
        Self::new(resource_id, action, OpResult::InProgress)
    }

    pub fn failed(resource_id: impl Into<String>, action: ActionType, err: impl Into<String>) -> Self {
        Self {
            op_err: Some(err.into()),
            ..Self::new(resource_id, action, OpResult::Failed)
        }
    }

    pub fn skipped(resource_id: impl Into<String>, action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            op_err: Some(reason.into()),
            ..Self::new(resource_id, action, OpResult::Skip)
        }
    }
}
