use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stratum_core::Resource;

use crate::error::RuntimeError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-call context handed to every runtime method.
///
/// Runtimes must observe `cancel`: subprocess-backed calls kill the child,
/// request-backed calls abandon the request.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub cancel: CancellationToken,
}

impl RuntimeContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub planned: Resource,
    pub stack: String,
    /// Run the plane's plan-only path and change nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ApplyResponse {
    /// The resource as it should be recorded in state.
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub prior: Option<Resource>,
    pub planned: Option<Resource>,
    pub stack: String,
}

#[derive(Debug, Clone)]
pub struct ReadResponse {
    /// `None` when the resource does not exist in the backend.
    pub resource: Option<Resource>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub resource: Resource,
    pub stack: String,
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub planned: Resource,
    pub stack: String,
}

#[derive(Debug, Clone)]
pub struct ImportResponse {
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub resource: Resource,
}

/// A change observed in the backend for a watched resource.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub resource_id: String,
    /// Raw live object as reported by the backend; `Null` once it is gone.
    pub live: Value,
    pub timestamp: jiff::Timestamp,
}

pub type WatchStream = mpsc::Receiver<WatchEvent>;

/// Capability contract implemented once per backend plane.
///
/// Methods return boxed futures so the trait stays object safe and planes can
/// be stored as `Arc<dyn Runtime>` in a [`crate::registry::Registry`].
///
/// Convention for implementors: `apply` returns the declared `attributes`
/// unchanged and records backend-observed data in `extensions`, so an
/// unchanged spec re-plans as `UnChange`. `read` projects the declared
/// attribute keys onto live values, so drift shows up as an `Update`.
pub trait Runtime: Send + Sync {
    fn apply<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: ApplyRequest,
    ) -> BoxFuture<'a, Result<ApplyResponse, RuntimeError>>;

    fn read<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: ReadRequest,
    ) -> BoxFuture<'a, Result<ReadResponse, RuntimeError>>;

    fn delete<'a>(
        &'a self,
        ctx: &'a RuntimeContext,
        request: DeleteRequest,
    ) -> BoxFuture<'a, Result<(), RuntimeError>>;

    /// Adopt an existing backend object. Not every plane supports it.
    fn import<'a>(
        &'a self,
        _ctx: &'a RuntimeContext,
        request: ImportRequest,
    ) -> BoxFuture<'a, Result<ImportResponse, RuntimeError>> {
        Box::pin(async move {
            Err(RuntimeError::Unsupported {
                operation: "import",
                resource_id: request.planned.id,
            })
        })
    }

    /// Stream backend changes for a resource. `Ok(None)` means the plane
    /// does not support watching.
    fn watch<'a>(
        &'a self,
        _ctx: &'a RuntimeContext,
        _request: WatchRequest,
    ) -> BoxFuture<'a, Result<Option<WatchStream>, RuntimeError>> {
        Box::pin(async { Ok(None) })
    }
}
