use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use stratum_core::canonical::to_canonical_string;
use stratum_engine::process::{CommandOutput, run_command};

use crate::error::KubectlError;
use crate::object::ObjectRef;

/// How the Kubernetes plane reaches its cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// `--context`; the kubeconfig's current context when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

fn default_binary() -> PathBuf {
    PathBuf::from("kubectl")
}

fn default_watch_interval_ms() -> u64 {
    2_000
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            context: None,
            kubeconfig: None,
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl KubernetesConfig {
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(1))
    }
}

/// Thin async wrapper over the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    config: KubernetesConfig,
}

impl Kubectl {
    pub fn new(config: KubernetesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KubernetesConfig {
        &self.config
    }

    /// Client-side `kubectl apply` of one manifest; returns the object the
    /// API server answered with. With `dry_run` the request is sent as
    /// `--dry-run=server`, so the server validates and defaults the object
    /// without persisting it.
    pub async fn apply(
        &self,
        manifest: &Map<String, Value>,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, KubectlError> {
        let body = to_canonical_string(&Value::Object(manifest.clone()))?;
        let mut args = vec!["apply", "-f", "-", "-o", "json"];
        if dry_run {
            args.push("--dry-run=server");
        }
        let output = self.run(&args, Some(body.into_bytes()), cancel).await?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// The live object, or `None` when the server has no such object.
    pub async fn get(&self, obj: &ObjectRef, cancel: &CancellationToken) -> Result<Option<Value>, KubectlError> {
        let kind = obj.kubectl_type();
        let mut args = vec!["get", kind.as_str(), obj.name.as_str(), "-o", "json", "--ignore-not-found"];
        push_namespace(&mut args, obj);
        let output = self.run(&args, None, cancel).await?;

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&output.stdout)?))
    }

    /// Delete and wait for finalizers. Deleting an absent object succeeds.
    pub async fn delete(&self, obj: &ObjectRef, cancel: &CancellationToken) -> Result<(), KubectlError> {
        let kind = obj.kubectl_type();
        let mut args = vec!["delete", kind.as_str(), obj.name.as_str(), "--ignore-not-found", "--wait=true"];
        push_namespace(&mut args, obj);
        self.run(&args, None, cancel).await?;
        Ok(())
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        if let Some(context) = &self.config.context {
            cmd.arg("--context").arg(context);
        }
        if let Some(kubeconfig) = &self.config.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.args(args);
        cmd
    }

    async fn run(
        &self,
        args: &[&str],
        stdin: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, KubectlError> {
        tracing::debug!(args = ?args, "running kubectl");
        let output = run_command(self.command(args), stdin, cancel).await?;
        if !output.success() {
            return Err(KubectlError::Failed(output.stderr_str()));
        }
        Ok(output)
    }
}

fn push_namespace<'a>(args: &mut Vec<&'a str>, obj: &'a ObjectRef) {
    if let Some(ns) = &obj.namespace {
        args.extend(["--namespace", ns.as_str()]);
    }
}
