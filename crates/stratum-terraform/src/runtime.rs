use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

use stratum_core::Resource;
use stratum_engine::{
    ApplyRequest, ApplyResponse, BoxFuture, DeleteRequest, ImportRequest, ImportResponse,
    ReadRequest, ReadResponse, Runtime, RuntimeContext, RuntimeError,
};

use crate::config::TerraformConfig;
use crate::error::TerraformError;
use crate::provider::ProviderAddr;
use crate::workspace::{TfResource, Workspace, ext};

/// Terraform-plane runtime.
///
/// Every operation holds `exclusive` for its whole duration, so at most one
/// `terraform` process runs per instance. Register one instance per run and
/// every Terraform-typed node of that run shares it.
pub struct TerraformRuntime {
    config: TerraformConfig,
    exclusive: Mutex<()>,
}

impl TerraformRuntime {
    pub fn new(config: TerraformConfig) -> Self {
        Self {
            config,
            exclusive: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TerraformConfig {
        &self.config
    }

    pub fn workspace(&self, resource_id: &str) -> Workspace {
        Workspace::new(&self.config, resource_id)
    }

    async fn lock(&self, ctx: &RuntimeContext) -> Result<MutexGuard<'_, ()>, TerraformError> {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(RuntimeError::Cancelled.into()),
            guard = self.exclusive.lock() => Ok(guard),
        }
    }

    async fn apply_resource(
        &self,
        ctx: &RuntimeContext,
        request: ApplyRequest,
    ) -> Result<ApplyResponse, TerraformError> {
        let _guard = self.lock(ctx).await?;
        let tf = TfResource::from_resource(&request.planned)?;
        let ws = self.workspace(&request.planned.id);

        ws.write_hcl(&tf).await?;
        ws.init(&ctx.cancel).await?;

        if request.dry_run {
            let planned = ws.plan(&tf, &ctx.cancel).await?;
            tracing::info!(id = %request.planned.id, known = planned.is_some(), "terraform plan complete");
            return Ok(ApplyResponse {
                resource: request.planned,
            });
        }

        ws.apply(&ctx.cancel).await?;
        let live = ws.show_state(&tf, &ctx.cancel).await?;
        let provider = ws.locked_provider(&tf.provider).await?;
        tracing::info!(id = %request.planned.id, provider = %provider, "terraform apply complete");

        Ok(ApplyResponse {
            resource: observed(request.planned, &provider, live),
        })
    }

    async fn read_resource(
        &self,
        ctx: &RuntimeContext,
        request: ReadRequest,
    ) -> Result<ReadResponse, TerraformError> {
        let Some(subject) = request.prior.or(request.planned) else {
            return Ok(ReadResponse { resource: None });
        };
        let _guard = self.lock(ctx).await?;
        let tf = TfResource::from_resource(&subject)?;
        let ws = self.workspace(&subject.id);

        ws.write_hcl(&tf).await?;
        ws.init(&ctx.cancel).await?;
        ws.write_tfstate(&tf).await?;
        ws.refresh_only(&ctx.cancel).await?;

        let Some(live) = ws.show_state(&tf, &ctx.cancel).await? else {
            tracing::info!(id = %subject.id, "resource no longer exists");
            ws.remove().await?;
            return Ok(ReadResponse { resource: None });
        };
        let provider = ws.locked_provider(&tf.provider).await?;

        let mut resource = observed(subject.clone(), &provider, Some(live.clone()));
        resource.attributes = project(&subject.attributes, &live);
        Ok(ReadResponse {
            resource: Some(resource),
        })
    }

    async fn delete_resource(
        &self,
        ctx: &RuntimeContext,
        request: DeleteRequest,
    ) -> Result<(), TerraformError> {
        let _guard = self.lock(ctx).await?;
        let tf = TfResource::from_resource(&request.resource)?;
        let ws = self.workspace(&request.resource.id);

        if !ws.has_config().await {
            ws.write_hcl(&tf).await?;
        }
        ws.init(&ctx.cancel).await?;
        if !ws.has_state().await {
            ws.write_tfstate(&tf).await?;
        }
        ws.destroy(&ctx.cancel).await?;
        ws.remove().await?;
        tracing::info!(id = %request.resource.id, "terraform destroy complete");
        Ok(())
    }

    async fn import_resource(
        &self,
        ctx: &RuntimeContext,
        request: ImportRequest,
    ) -> Result<ImportResponse, TerraformError> {
        let planned = request.planned;
        let Some(import_id) = planned.extension_str(ext::IMPORT_ID).map(str::to_string) else {
            return Err(RuntimeError::Unsupported {
                operation: "import",
                resource_id: planned.id,
            }
            .into());
        };

        let _guard = self.lock(ctx).await?;
        let tf = TfResource::from_resource(&planned)?;
        let ws = self.workspace(&planned.id);

        ws.write_hcl(&tf).await?;
        ws.init(&ctx.cancel).await?;
        ws.import(&tf, &import_id, &ctx.cancel).await?;
        let live = ws.show_state(&tf, &ctx.cancel).await?;
        let provider = ws.locked_provider(&tf.provider).await?;
        tracing::info!(id = %planned.id, import_id = %import_id, "terraform import complete");

        Ok(ImportResponse {
            resource: observed(planned, &provider, live),
        })
    }
}

/// Record what Terraform reported without touching declared attributes.
fn observed(mut resource: Resource, provider: &ProviderAddr, live: Option<Map<String, Value>>) -> Resource {
    resource
        .extensions
        .insert(ext::PROVIDER.into(), Value::String(provider.to_string()));
    if let Some(live) = live {
        resource
            .extensions
            .insert(ext::LIVE_ATTRIBUTES.into(), Value::Object(live));
    }
    resource
}

/// Declared keys with their live values; a key missing from `live` drops out.
fn project(declared: &Map<String, Value>, live: &Map<String, Value>) -> Map<String, Value> {
    declared
        .keys()
        .filter_map(|key| live.get(key).map(|v| (key.clone(), v.clone())))
        .collect()
}

impl Runtime for TerraformRuntime {
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
}
