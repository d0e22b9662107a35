//! Plain-text rendering of plans, progress messages and run summaries.

use serde_json::Value;

use stratum_core::{ActionType, ChangeOrder, Message, OpResult};
use stratum_engine::{ExecuteSummary, diff_fields};

fn verb(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "creating",
        ActionType::Update => "updating",
        ActionType::Delete => "deleting",
        ActionType::UnChange => "checking",
        ActionType::Undefined => "starting",
    }
}

/// One line per progress message.
pub fn message_line(msg: &Message) -> String {
    let status = match msg.op_result {
        OpResult::InProgress => format!("{}...", verb(msg.action)),
        OpResult::Success => "done".to_string(),
        OpResult::Failed => "FAILED".to_string(),
        OpResult::Skip => "skipped".to_string(),
    };
    match &msg.op_err {
        Some(err) => format!("{} {}: {status} ({err})", msg.action.symbol(), msg.resource_id),
        None => format!("{} {}: {status}", msg.action.symbol(), msg.resource_id),
    }
}

fn show(value: Option<&Value>) -> String {
    value.map_or_else(|| "(none)".to_string(), Value::to_string)
}

/// Changed steps in plan order; updates list their changed fields.
pub fn plan_lines(order: &ChangeOrder) -> Vec<String> {
    let mut lines = Vec::new();
    for step in order.steps().filter(|s| s.action.is_change()) {
        lines.push(format!("{} {}", step.action.symbol(), step.id));
        if step.action == ActionType::Update {
            for diff in diff_fields(step.from.as_ref(), step.to.as_ref()) {
                lines.push(format!(
                    "    {}: {} -> {}",
                    diff.path,
                    show(diff.before.as_ref()),
                    show(diff.after.as_ref())
                ));
            }
        }
    }
    lines.push(format!(
        "Plan: {} to create, {} to update, {} to delete, {} unchanged.",
        order.count(ActionType::Create),
        order.count(ActionType::Update),
        order.count(ActionType::Delete),
        order.count(ActionType::UnChange),
    ));
    lines
}

pub fn summary_line(summary: &ExecuteSummary) -> String {
    format!(
        "{} created, {} updated, {} deleted, {} unchanged, {} skipped, {} failed",
        summary.created,
        summary.updated,
        summary.deleted,
        summary.unchanged,
        summary.skipped,
        summary.failed,
    )
}
