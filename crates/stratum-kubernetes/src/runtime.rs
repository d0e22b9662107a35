use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use stratum_core::Resource;
use stratum_engine::{
    ApplyRequest, ApplyResponse, BoxFuture, DeleteRequest, ImportRequest, ImportResponse,
    ReadRequest, ReadResponse, Runtime, RuntimeContext, RuntimeError, WatchEvent, WatchRequest,
    WatchStream,
};

use crate::error::KubectlError;
use crate::kubectl::{Kubectl, KubernetesConfig};
use crate::object::{ObjectRef, project};

/// Extension keys written by this runtime.
pub mod ext {
    pub const UID: &str = "uid";
    pub const RESOURCE_VERSION: &str = "resourceVersion";
}

const WATCH_BUFFER: usize = 16;

/// Kubernetes-plane runtime. Resource attributes are the object manifest.
pub struct KubernetesRuntime {
    kubectl: Kubectl,
}

impl KubernetesRuntime {
    pub fn new(config: KubernetesConfig) -> Self {
        Self {
            kubectl: Kubectl::new(config),
        }
    }

    pub fn kubectl(&self) -> &Kubectl {
        &self.kubectl
    }

    fn object(resource: &Resource) -> Result<ObjectRef, KubectlError> {
        let obj = ObjectRef::from_manifest(&resource.attributes)?;
        if obj.canonical_id() != resource.id {
            tracing::warn!(
                id = %resource.id,
                canonical = %obj.canonical_id(),
                "resource id does not match its manifest"
            );
        }
        Ok(obj)
    }

    async fn apply_resource(&self, ctx: &RuntimeContext, request: ApplyRequest) -> Result<ApplyResponse, KubectlError> {
        Self::object(&request.planned)?;
        let live = self
            .kubectl
            .apply(&request.planned.attributes, request.dry_run, &ctx.cancel)
            .await?;
        tracing::info!(id = %request.planned.id, dry_run = request.dry_run, "kubectl apply complete");

        let resource = if request.dry_run {
            request.planned
        } else {
            observed(request.planned, &live)
        };
        Ok(ApplyResponse { resource })
    }

    async fn read_resource(&self, ctx: &RuntimeContext, request: ReadRequest) -> Result<ReadResponse, KubectlError> {
        let Some(subject) = request.prior.or(request.planned) else {
            return Ok(ReadResponse { resource: None });
        };
        let obj = Self::object(&subject)?;
        let Some(live) = self.kubectl.get(&obj, &ctx.cancel).await? else {
            tracing::info!(id = %subject.id, "object no longer exists");
            return Ok(ReadResponse { resource: None });
        };

        let projected = project(&Value::Object(subject.attributes.clone()), &live);
        let mut resource = observed(subject, &live);
        if let Value::Object(attributes) = projected {
            resource.attributes = attributes;
        }
        Ok(ReadResponse {
            resource: Some(resource),
        })
    }

    async fn delete_resource(&self, ctx: &RuntimeContext, request: DeleteRequest) -> Result<(), KubectlError> {
        let obj = Self::object(&request.resource)?;
        self.kubectl.delete(&obj, &ctx.cancel).await?;
        tracing::info!(id = %request.resource.id, "kubectl delete complete");
        Ok(())
    }

    async fn import_resource(&self, ctx: &RuntimeContext, request: ImportRequest) -> Result<ImportResponse, KubectlError> {
        let obj = Self::object(&request.planned)?;
        let live = self
            .kubectl
            .get(&obj, &ctx.cancel)
            .await?
            .ok_or_else(|| KubectlError::NotFound(obj.canonical_id()))?;
        tracing::info!(id = %request.planned.id, "adopted existing object");
        Ok(ImportResponse {
            resource: observed(request.planned, &live),
        })
    }
}

/// Attach server-assigned identity without touching declared attributes.
fn observed(mut resource: Resource, live: &Value) -> Resource {
    for (key, pointer) in [(ext::UID, "/metadata/uid"), (ext::RESOURCE_VERSION, "/metadata/resourceVersion")] {
        if let Some(value) = live.pointer(pointer).and_then(Value::as_str) {
            resource.extensions.insert(key.into(), Value::String(value.to_string()));
        }
    }
    resource
}

fn resource_version(live: &Value) -> String {
    live.pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Poll until cancelled or the receiver goes away. The first observation is
/// always sent; after that only resourceVersion changes (including the object
/// disappearing, reported as `Null`).
async fn poll(
    kubectl: Kubectl,
    obj: ObjectRef,
    resource_id: String,
    interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<WatchEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<Option<String>> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        let live = match kubectl.get(&obj, &cancel).await {
            Ok(live) => live,
            Err(KubectlError::Process(RuntimeError::Cancelled)) => break,
            Err(e) => {
                tracing::warn!(id = %resource_id, error = %e, "watch poll failed");
                continue;
            }
        };

        let marker = live.as_ref().map(resource_version);
        if last.as_ref() == Some(&marker) {
            continue;
        }
        last = Some(marker);

        let event = WatchEvent {
            resource_id: resource_id.clone(),
            live: live.unwrap_or(Value::Null),
            timestamp: jiff::Timestamp::now(),
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    tracing::debug!(id = %resource_id, "watch stopped");
}

impl Runtime for KubernetesRuntime {
    fn apply<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: ApplyRequest,
    ) -> BoxFuture<'a, Result<ApplyResponse, RuntimeError>> {
        Box::pin(async move { Ok(self.apply_resource(ctx, request).await?) })
    }

    fn read<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: ReadRequest,
    ) -> BoxFuture<'a, Result<ReadResponse, RuntimeError>> {
        Box::pin(async move { Ok(self.read_resource(ctx, request).await?) })
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: DeleteRequest,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move { Ok(self.delete_resource(ctx, request).await?) })
    }

    fn import<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: ImportRequest,
    ) -> BoxFuture<'a, Result<ImportResponse, RuntimeError>> {
        Box::pin(async move { Ok(self.import_resource(ctx, request).await?) })
    }

    fn watch<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: WatchRequest,
    ) -> BoxFuture<'a, Result<Option<WatchStream>, RuntimeError>> {
        Box::pin(async move {
            let obj = Self::object(&request.resource)?;
            let (tx, rx) = mpsc::channel(WATCH_BUFFER);
            tokio::spawn(poll(
                self.kubectl.clone(),
                obj,
                request.resource.id,
                self.kubectl.config().watch_interval(),
                ctx.cancel.clone(),
                tx,
            ));
            Ok(Some(rx))
        })
    }
}
