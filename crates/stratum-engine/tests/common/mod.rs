#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stratum_core::{ChangeOrder, Message, Resource, ResourceType};
use stratum_engine::{
    ApplyRequest, ApplyResponse, BoxFuture, DeleteRequest, EngineError, ExecuteOptions,
    ExecuteReport, Executor, Operation, ReadRequest, ReadResponse, Registry, Runtime,
    RuntimeContext, RuntimeError,
};
use stratum_storage::StateStorage;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub id: String,
    pub dry_run: bool,
}

/// In-memory runtime that records every call and can be told to fail.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    live: Mutex<HashMap<String, Resource>>,
    failing: HashSet<String>,
    delay: Duration,
    keep_after_delete: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Deletes report success but leave the object in place.
    pub fn sticky_deletes(mut self) -> Self {
        self.keep_after_delete = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.id).collect()
    }

    fn record(&self, op: &'static str, id: &str, dry_run: bool) {
        self.calls.lock().unwrap().push(Call {
            op,
            id: id.to_string(),
            dry_run,
        });
    }

    async fn pause(&self, ctx: &RuntimeContext) -> Result<(), RuntimeError> {
        if self.delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(()),
            () = ctx.cancel.cancelled() => Err(RuntimeError::Cancelled),
        }
    }

    fn check(&self, id: &str) -> Result<(), RuntimeError> {
        if self.failing.contains(id) {
            Err(RuntimeError::Api(format!("{id}: injected failure")))
        } else {
            Ok(())
        }
    }
}

impl Runtime for FakeRuntime {
    fn apply<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: ApplyRequest,
    ) -> BoxFuture<'a, Result<ApplyResponse, RuntimeError>> {
        Box::pin(async move {
            self.record("apply", &request.planned.id, request.dry_run);
            self.pause(ctx).await?;
            self.check(&request.planned.id)?;
            if !request.dry_run {
                self.live
                    .lock()
                    .unwrap()
                    .insert(request.planned.id.clone(), request.planned.clone());
            }
            Ok(ApplyResponse {
                resource: request.planned,
            })
        })
    }

    fn read<'a>(
        &'a self,
        _ctx: &'a RuntimeContext,
        request: ReadRequest,
    ) -> BoxFuture<'a, Result<ReadResponse, RuntimeError>> {
        Box::pin(async move {
            let id = request
                .prior
                .as_ref()
                .or(request.planned.as_ref())
                .map(|r| r.id.clone())
                .unwrap_or_default();
            self.record("read", &id, false);
            Ok(ReadResponse {
                resource: self.live.lock().unwrap().get(&id).cloned(),
            })
        })
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: DeleteRequest,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move {
            self.record("delete", &request.resource.id, false);
            self.pause(ctx).await?;
            self.check(&request.resource.id)?;
            if !self.keep_after_delete {
                self.live.lock().unwrap().remove(&request.resource.id);
            } else {
                self.live
                    .lock()
                    .unwrap()
                    .insert(request.resource.id.clone(), request.resource.clone());
            }
            Ok(())
        })
    }
}

pub fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn terraform(id: &str, value: Value) -> Resource {
    Resource::new(id, ResourceType::Terraform, attrs(value))
}

pub fn simple(id: &str) -> Resource {
    terraform(id, json!({"name": id}))
}

pub fn registry_with(runtime: Arc<FakeRuntime>) -> Registry {
    let mut registry = Registry::new();
    registry.register_instance(ResourceType::Terraform, runtime);
    registry
}

/// Execute `order` while draining messages concurrently.
pub async fn execute(
    registry: Registry,
    storage: Arc<dyn StateStorage>,
    order: &ChangeOrder,
    operation: Operation,
    opts: &ExecuteOptions,
    cancel: CancellationToken,
) -> (Result<ExecuteReport, EngineError>, Vec<Message>) {
    let executor = Executor::new(Arc::new(registry), storage);
    let (tx, rx) = mpsc::channel(4);
    let collector = tokio::spawn(collect(rx));
    let result = executor.execute(order, operation, opts, tx, cancel).await;
    let messages = collector.await.unwrap();
    (result, messages)
}

pub async fn collect(mut rx: mpsc::Receiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Some(message) = rx.recv().await {
        out.push(message);
    }
    out
}

/// Index of the first message for `id` matching `terminal`.
pub fn position(messages: &[Message], id: &str, terminal: bool) -> usize {
    messages
        .iter()
        .position(|m| m.resource_id == id && m.op_result.is_terminal() == terminal)
        .unwrap_or_else(|| panic!("no {} message for {id}", if terminal { "terminal" } else { "dispatch" }))
}
