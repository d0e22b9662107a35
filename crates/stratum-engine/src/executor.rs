//! Concurrent walk of a [`ChangeOrder`].
//!
//! Every step runs as its own task. A task first waits for the steps it must
//! follow to reach a terminal status, then dispatches to the runtime of its
//! resource type, persists the result, and publishes its own status.
//!
//! Wait rules for a dependency `s -> d` (s depends on d):
//! - `s` not a delete: `s` waits for `d`.
//! - both deletes: `d` waits for `s` (dependents are torn down first).
//! - `s` a delete, `d` not: no constraint.
//!
//! In apply runs a delete of `d` also waits for any non-delete step whose
//! prior state depends on `d`; if that step fails, the delete is skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use stratum_core::{ActionType, ChangeOrder, ChangeStep, Message, OpResult, Resource};
use stratum_storage::{StateStorage, StorageError};

use crate::error::{EngineError, RuntimeError};
use crate::graph::DependencyGraph;
use crate::registry::{Registry, RuntimeSet};
use crate::runtime::{ApplyRequest, DeleteRequest, ReadRequest, RuntimeContext};
use crate::summary::ExecuteSummary;

/// What a run is allowed to do with the steps it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Apply,
    Destroy,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub stack: String,
    /// Recorded in state before the first mutation.
    pub operator: Option<String>,
    /// Route creates and updates through the runtime's plan-only path, skip
    /// deletes, and never write state.
    pub dry_run: bool,
    /// Upper bound on concurrently dispatched steps. `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// After a delete, read the resource back and fail if it still exists.
    pub confirm_delete: bool,
}

impl ExecuteOptions {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            operator: None,
            dry_run: false,
            max_concurrency: None,
            confirm_delete: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn confirm_delete(mut self, confirm: bool) -> Self {
        self.confirm_delete = confirm;
        self
    }
}

/// Terminal result of one step.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub action: ActionType,
    pub result: OpResult,
    pub error: Option<String>,
    /// What the runtime reported back, for successful creates and updates.
    pub resource: Option<Resource>,
}

impl NodeOutcome {
    fn success(action: ActionType, resource: Option<Resource>) -> Self {
        Self {
            action,
            result: OpResult::Success,
            error: None,
            resource,
        }
    }

    fn failed(action: ActionType, error: impl Into<String>) -> Self {
        Self {
            action,
            result: OpResult::Failed,
            error: Some(error.into()),
            resource: None,
        }
    }

    fn skipped(action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            action,
            result: OpResult::Skip,
            error: Some(reason.into()),
            resource: None,
        }
    }

    fn message(&self, id: &str) -> Message {
        match self.result {
            OpResult::Failed => Message::failed(id, self.action, self.error.clone().unwrap_or_default()),
            OpResult::Skip => Message::skipped(id, self.action, self.error.clone().unwrap_or_default()),
            result => Message::new(id, self.action, result),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteReport {
    pub run_id: String,
    pub summary: ExecuteSummary,
    pub outcomes: BTreeMap<String, NodeOutcome>,
    /// The run was cancelled before every step could dispatch.
    pub cancelled: bool,
}

impl ExecuteReport {
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(id)
    }
}

pub struct Executor {
    registry: Arc<Registry>,
    storage: Arc<dyn StateStorage>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>, storage: Arc<dyn StateStorage>) -> Self {
        Self { registry, storage }
    }

    /// Walk `order` to completion.
    ///
    /// Every step yields exactly two messages on `messages`: an `InProgress`
    /// once its wait set is terminal, then its terminal result. The channel
    /// closes when this returns, after every step is terminal.
    ///
    /// Per-step failures are reported in the returned [`ExecuteReport`]. An
    /// `Err` is returned only for graph errors (before anything runs) or a
    /// state-storage failure (after in-flight steps settle).
    pub async fn execute(
        &self,
        order: &ChangeOrder,
        operation: Operation,
        opts: &ExecuteOptions,
        messages: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Result<ExecuteReport, EngineError> {
        let graph = DependencyGraph::from_order(order)?;
        check_actions(order, operation)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id, stack = %opts.stack, operation = operation.as_str());

        if !opts.dry_run
            && let Some(operator) = &opts.operator
        {
            self.storage.set_operator(&opts.stack, operator).await?;
        }

        let runtimes = self.registry.instantiate(
            order
                .change_steps
                .values()
                .filter_map(ChangeStep::subject)
                .map(|r| &r.resource_type),
        );

        let run_cancel = cancel.child_token();
        let run = Arc::new(RunShared {
            stack: opts.stack.clone(),
            dry_run: opts.dry_run,
            confirm_delete: opts.confirm_delete,
            storage: Arc::clone(&self.storage),
            runtimes,
            state_lock: Mutex::new(()),
            fatal: StdMutex::new(None),
            cancel: run_cancel.clone(),
            limiter: opts.max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            messages,
        });

        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for id in order.change_steps.keys() {
            let (tx, rx) = watch::channel(NodeStatus::Pending);
            senders.insert(id.as_str(), tx);
            receivers.insert(id.as_str(), rx);
        }

        tracing::info!(parent: &span, steps = order.len(), dry_run = opts.dry_run, "run started");

        let mut waits_by_id = wait_sets(order, &graph);
        let mut tasks = JoinSet::new();
        for (id, step) in &order.change_steps {
            let waits = waits_by_id
                .remove(id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|dep| receivers.get(dep.as_str()).map(|rx| (dep, rx.clone())))
                .collect();
            let Some(status) = senders.remove(id.as_str()) else {
                continue;
            };
            let node_span = tracing::info_span!(parent: &span, "step", id = %id, action = %step.action);
            tasks.spawn(run_node(Arc::clone(&run), step.clone(), waits, status).instrument(node_span));
        }
        drop(receivers);

        let mut summary = ExecuteSummary::default();
        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    summary.record(outcome.action, outcome.result);
                    outcomes.insert(id, outcome);
                }
                Err(e) => {
                    run_cancel.cancel();
                    return Err(EngineError::Internal(format!("step task failed: {e}")));
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        let fatal = run.take_fatal();
        drop(run);

        tracing::info!(
            parent: &span,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled,
            "run finished"
        );

        if let Some(err) = fatal {
            return Err(EngineError::StateStorage(err));
        }

        Ok(ExecuteReport {
            run_id,
            summary,
            outcomes,
            cancelled,
        })
    }
}

fn check_actions(order: &ChangeOrder, operation: Operation) -> Result<(), EngineError> {
    for step in order.change_steps.values() {
        let allowed = match operation {
            Operation::Apply => step.action != ActionType::Undefined,
            Operation::Destroy => step.action == ActionType::Delete,
        };
        if !allowed {
            return Err(EngineError::InvalidStep {
                operation: operation.as_str(),
                action: step.action.to_string(),
                id: step.id.clone(),
            });
        }
    }
    Ok(())
}

/// Ids each step must wait on before it may dispatch, keyed by step id.
///
/// A delete also waits on every surviving step whose prior state depends on
/// it. Those extra waits are dropped, with a warning, when they would close a
/// cycle.
pub fn wait_sets(order: &ChangeOrder, graph: &DependencyGraph) -> BTreeMap<String, BTreeSet<String>> {
    let base: BTreeMap<String, BTreeSet<String>> = order
        .change_steps
        .values()
        .map(|step| (step.id.clone(), direct_waits(order, graph, step)))
        .collect();

    let mut extended = base.clone();
    let mut added = false;
    for step in order.change_steps.values().filter(|s| s.action != ActionType::Delete) {
        let Some(prior) = &step.from else {
            continue;
        };
        let already = base.get(&step.id);
        for dep in &prior.depends_on {
            if !is_delete(order, dep) || already.is_some_and(|w| w.contains(dep)) {
                continue;
            }
            if let Some(waits) = extended.get_mut(dep) {
                added |= waits.insert(step.id.clone());
            }
        }
    }
    if !added {
        return base;
    }

    match DependencyGraph::new(extended.clone()) {
        Ok(_) => extended,
        Err(err) => {
            tracing::warn!(error = %err, "prior dependents would deadlock deletes, not waiting on them");
            base
        }
    }
}

fn is_delete(order: &ChangeOrder, id: &str) -> bool {
    order.get(id).is_some_and(|s| s.action == ActionType::Delete)
}

fn direct_waits(order: &ChangeOrder, graph: &DependencyGraph, step: &ChangeStep) -> BTreeSet<String> {
    if step.action == ActionType::Delete {
        // Deletes follow deleting dependents.
        graph
            .dependents(&step.id)
            .filter(|dependent| is_delete(order, dependent))
            .cloned()
            .collect()
    } else {
        graph.dependencies(&step.id).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    Pending,
    Success,
    Failed,
    Skip,
}

impl From<OpResult> for NodeStatus {
    fn from(result: OpResult) -> Self {
        match result {
            OpResult::Success => Self::Success,
            OpResult::Failed => Self::Failed,
            OpResult::Skip => Self::Skip,
            OpResult::InProgress => Self::Pending,
        }
    }
}

struct RunShared {
    stack: String,
    dry_run: bool,
    confirm_delete: bool,
    storage: Arc<dyn StateStorage>,
    runtimes: RuntimeSet,
    /// Serializes every state write of the run.
    state_lock: Mutex<()>,
    fatal: StdMutex<Option<StorageError>>,
    cancel: CancellationToken,
    limiter: Option<Arc<Semaphore>>,
    messages: mpsc::Sender<Message>,
}

impl RunShared {
    async fn emit(&self, message: Message) {
        // A dropped receiver only means nobody is listening.
        let _ = self.messages.send(message).await;
    }

    fn take_fatal(&self) -> Option<StorageError> {
        self.fatal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn record_fatal(&self, err: StorageError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.cancel.cancel();
    }

    async fn persist_upsert(&self, resource: &Resource) -> Result<(), String> {
        let _guard = self.state_lock.lock().await;
        self.storage
            .upsert(&self.stack, resource)
            .await
            .map_err(|e| self.storage_failed(e))
    }

    async fn persist_delete(&self, id: &str) -> Result<(), String> {
        let _guard = self.state_lock.lock().await;
        self.storage
            .delete(&self.stack, id)
            .await
            .map_err(|e| self.storage_failed(e))
    }

    fn storage_failed(&self, err: StorageError) -> String {
        tracing::error!(error = %err, "state write failed, cancelling run");
        let msg = format!("state persistence failed: {err}");
        self.record_fatal(err);
        msg
    }

    async fn dispatch(&self, step: &ChangeStep) -> NodeOutcome {
        let action = step.action;
        match action {
            ActionType::UnChange => NodeOutcome::success(action, step.to.clone()),
            ActionType::Create | ActionType::Update => match self.apply(step).await {
                Ok(resource) => NodeOutcome::success(action, Some(resource)),
                Err(err) => NodeOutcome::failed(action, err),
            },
            ActionType::Delete => match self.delete(step).await {
                Ok(()) => NodeOutcome::success(action, None),
                Err(err) => NodeOutcome::failed(action, err),
            },
            ActionType::Undefined => NodeOutcome::failed(action, "undefined action"),
        }
    }

    async fn apply(&self, step: &ChangeStep) -> Result<Resource, String> {
        let planned = step
            .to
            .clone()
            .ok_or_else(|| format!("{} has no planned state", step.id))?;
        let runtime = self.runtimes.resolve(&planned.resource_type).map_err(|e| e.to_string())?;
        let ctx = RuntimeContext::new(self.cancel.clone());

        let response = runtime
            .apply(
                &ctx,
                ApplyRequest {
                    planned,
                    stack: self.stack.clone(),
                    dry_run: self.dry_run,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        if !self.dry_run {
            self.persist_upsert(&response.resource).await?;
        }
        Ok(response.resource)
    }

    async fn delete(&self, step: &ChangeStep) -> Result<(), String> {
        let prior = step
            .from
            .clone()
            .ok_or_else(|| format!("{} has no prior state", step.id))?;
        let runtime = self.runtimes.resolve(&prior.resource_type).map_err(|e| e.to_string())?;

        if self.dry_run {
            tracing::info!(id = %step.id, "dry run, delete not sent");
            return Ok(());
        }

        let ctx = RuntimeContext::new(self.cancel.clone());
        runtime
            .delete(
                &ctx,
                DeleteRequest {
                    resource: prior.clone(),
                    stack: self.stack.clone(),
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        if self.confirm_delete {
            let read = runtime
                .read(
                    &ctx,
                    ReadRequest {
                        prior: Some(prior),
                        planned: None,
                        stack: self.stack.clone(),
                    },
                )
                .await
                .map_err(|e| e.to_string())?;
            if read.resource.is_some() {
                return Err(RuntimeError::Api(format!("{} still exists after delete", step.id)).to_string());
            }
        }

        self.persist_delete(&step.id).await
    }
}

async fn run_node(
    run: Arc<RunShared>,
    step: ChangeStep,
    waits: Vec<(String, watch::Receiver<NodeStatus>)>,
    status: watch::Sender<NodeStatus>,
) -> (String, NodeOutcome) {
    let mut blocked = wait_for(&run.cancel, waits).await;

    // Held until the step is terminal.
    let mut _permit = None;
    if blocked.is_none()
        && let Some(limiter) = &run.limiter
    {
        tokio::select! {
            permit = Arc::clone(limiter).acquire_owned() => _permit = permit.ok(),
            () = run.cancel.cancelled() => blocked = Some("run cancelled before dispatch".to_string()),
        }
    }

    run.emit(Message::in_progress(&step.id, step.action)).await;

    let outcome = match blocked {
        Some(reason) => {
            tracing::info!(reason = %reason, "step skipped");
            NodeOutcome::skipped(step.action, reason)
        }
        None => {
            tracing::info!("step dispatched");
            let outcome = run.dispatch(&step).await;
            match &outcome.error {
                Some(err) => tracing::warn!(error = %err, "step failed"),
                None => tracing::info!("step succeeded"),
            }
            outcome
        }
    };

    // Terminal message goes out before dependents can observe the status.
    run.emit(outcome.message(&step.id)).await;
    status.send_replace(outcome.result.into());

    (step.id, outcome)
}

/// Wait until every id in `waits` is terminal. Returns the reason to skip, if
/// any of them did not succeed or the run was cancelled.
async fn wait_for(
    cancel: &CancellationToken,
    waits: Vec<(String, watch::Receiver<NodeStatus>)>,
) -> Option<String> {
    for (dep, mut rx) in waits {
        let status = tokio::select! {
            changed = rx.wait_for(|s| *s != NodeStatus::Pending) => match changed {
                Ok(status) => *status,
                Err(_) => NodeStatus::Failed,
            },
            () = cancel.cancelled() => return Some("run cancelled before dispatch".to_string()),
        };
        match status {
            NodeStatus::Success | NodeStatus::Pending => {}
            NodeStatus::Failed => return Some(format!("dependency {dep} failed")),
            NodeStatus::Skip => return Some(format!("dependency {dep} was skipped")),
        }
    }
    if cancel.is_cancelled() {
        return Some("run cancelled before dispatch".to_string());
    }
    None
}
