use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stratum_core::{ChangeOrder, Message, Spec};
use stratum_storage::StateStorage;

use crate::error::EngineError;
use crate::executor::{ExecuteOptions, ExecuteReport, Executor, Operation};
use crate::order::{build_change_order, build_destroy_order};
use crate::registry::Registry;

/// Entry point for callers: plans against stored state and executes plans.
pub struct Engine {
    storage: Arc<dyn StateStorage>,
    executor: Executor,
}

/// A plan together with the dry-run walk that exercised it.
#[derive(Debug, Clone)]
pub struct Preview {
    pub order: ChangeOrder,
    pub report: ExecuteReport,
}

impl Engine {
    pub fn new(registry: Registry, storage: Arc<dyn StateStorage>) -> Self {
        Self {
            executor: Executor::new(Arc::new(registry), Arc::clone(&storage)),
            storage,
        }
    }

    /// Diff `spec` against the stack's stored state. Calls no runtime.
    pub async fn plan(&self, spec: &Spec, stack: &str) -> Result<ChangeOrder, EngineError> {
        let prior = self.storage.get(stack).await?;
        build_change_order(spec, &prior)
    }

    /// Plan deletion of everything the stack's state records.
    pub async fn plan_destroy(&self, stack: &str) -> Result<ChangeOrder, EngineError> {
        let prior = self.storage.get(stack).await?;
        build_destroy_order(&prior)
    }

    /// Plan, then walk the plan through every runtime's plan-only path.
    /// State is never written.
    pub async fn preview(
        &self,
        spec: &Spec,
        opts: &ExecuteOptions,
        messages: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Result<Preview, EngineError> {
        let order = self.plan(spec, &opts.stack).await?;
        let opts = opts.clone().dry_run(true);
        let report = self
            .executor
            .execute(&order, Operation::Apply, &opts, messages, cancel)
            .await?;
        Ok(Preview { order, report })
    }

    pub async fn apply(
        &self,
        order: &ChangeOrder,
        opts: &ExecuteOptions,
        messages: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Result<ExecuteReport, EngineError> {
        self.executor
            .execute(order, Operation::Apply, opts, messages, cancel)
            .await
    }

    /// Execute a destroy plan from [`Engine::plan_destroy`]. Dependents are
    /// deleted before the resources they depend on.
    pub async fn destroy(
        &self,
        order: &ChangeOrder,
        opts: &ExecuteOptions,
        messages: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Result<ExecuteReport, EngineError> {
        self.executor
            .execute(order, Operation::Destroy, opts, messages, cancel)
            .await
    }
}
