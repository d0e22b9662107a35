//! One isolated Terraform working directory per resource.
//!
//! Layout: `<workspace_root>/<resource_key(id)>/{main.tf.json,
//! .terraform.lock.hcl, terraform.tfstate}`. The directory is owned by
//! whichever task is processing that resource id; the runtime's mutex
//! serializes every CLI call across directories.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use stratum_core::Resource;
use stratum_core::canonical::{canonicalize, to_canonical_string, to_canonical_vec};
use stratum_core::id::resource_key;
use stratum_engine::process::{CommandOutput, run_command};

use crate::config::TerraformConfig;
use crate::diagnostics::first_error;
use crate::error::TerraformError;
use crate::provider::{ProviderAddr, parse_lock_file};

/// Local name of the single resource block inside each workspace.
pub const RESOURCE_NAME: &str = "stratum";

pub const CONFIG_FILE: &str = "main.tf.json";
pub const LOCK_FILE: &str = ".terraform.lock.hcl";
pub const STATE_FILE: &str = "terraform.tfstate";
const PLAN_FILE: &str = "tfplan";

/// Extension keys read and written on Terraform-typed resources.
pub mod ext {
    /// `[hostname/]namespace/type[/version]`
    pub const PROVIDER: &str = "provider";
    /// Provider-specific resource type, e.g. `local_file`.
    pub const RESOURCE_TYPE: &str = "resourceType";
    /// Body of the `provider` configuration block.
    pub const PROVIDER_META: &str = "providerMeta";
    /// Backend id handed to `terraform import`.
    pub const IMPORT_ID: &str = "importId";
    /// Last attribute values reported by Terraform state.
    pub const LIVE_ATTRIBUTES: &str = "liveAttributes";
}

/// The Terraform-specific parts of a resource.
#[derive(Debug, Clone)]
pub struct TfResource<'a> {
    pub resource: &'a Resource,
    pub provider: ProviderAddr,
    pub type_name: &'a str,
}

impl<'a> TfResource<'a> {
    pub fn from_resource(resource: &'a Resource) -> Result<Self, TerraformError> {
        let provider = resource
            .extension_str(ext::PROVIDER)
            .ok_or_else(|| missing(resource, ext::PROVIDER))?
            .parse()?;
        let type_name = resource
            .extension_str(ext::RESOURCE_TYPE)
            .ok_or_else(|| missing(resource, ext::RESOURCE_TYPE))?;
        Ok(Self {
            resource,
            provider,
            type_name,
        })
    }

    /// `<type>.stratum`, the address Terraform reports for this resource.
    pub fn address(&self) -> String {
        format!("{}.{RESOURCE_NAME}", self.type_name)
    }

    /// Last observed values, falling back to the declared attributes.
    pub fn known_values(&self) -> Map<String, Value> {
        match self.resource.extensions.get(ext::LIVE_ATTRIBUTES) {
            Some(Value::Object(live)) => live.clone(),
            _ => self.resource.attributes.clone(),
        }
    }
}

fn missing(resource: &Resource, key: &'static str) -> TerraformError {
    TerraformError::MissingExtension {
        id: resource.id.clone(),
        key,
    }
}

/// Terraform JSON configuration for one resource, keys canonically sorted.
pub fn render_config(tf: &TfResource<'_>) -> Value {
    let local = tf.provider.local_name();

    let mut requirement = Map::new();
    requirement.insert("source".into(), Value::String(tf.provider.source()));
    if let Some(version) = &tf.provider.version {
        requirement.insert("version".into(), Value::String(version.clone()));
    }

    let provider_block = match tf.resource.extensions.get(ext::PROVIDER_META) {
        Some(meta @ Value::Object(_)) => meta.clone(),
        _ => json!({}),
    };

    canonicalize(&json!({
        "terraform": {
            "required_providers": { local: requirement },
        },
        "provider": { local: provider_block },
        "resource": {
            tf.type_name: { RESOURCE_NAME: tf.resource.attributes },
        },
    }))
}

/// Byte-exact contents of `main.tf.json`.
pub fn render_hcl(tf: &TfResource<'_>) -> Result<String, TerraformError> {
    Ok(to_canonical_string(&render_config(tf))?)
}

pub struct Workspace {
    dir: PathBuf,
    binary: PathBuf,
    plugin_cache_dir: Option<PathBuf>,
}

impl Workspace {
    pub fn new(config: &TerraformConfig, resource_id: &str) -> Self {
        Self {
            dir: config.workspace_root.join(resource_key(resource_id)),
            binary: config.binary.clone(),
            plugin_cache_dir: config.plugin_cache_dir.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub async fn has_config(&self) -> bool {
        tokio::fs::try_exists(self.config_path()).await.unwrap_or(false)
    }

    pub async fn has_state(&self) -> bool {
        tokio::fs::try_exists(self.state_path()).await.unwrap_or(false)
    }

    /// Write `main.tf.json`, creating the directory if needed.
    pub async fn write_hcl(&self, tf: &TfResource<'_>) -> Result<(), TerraformError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.config_path(), render_hcl(tf)?).await?;
        tracing::debug!(dir = %self.dir.display(), "terraform configuration written");
        Ok(())
    }

    /// Run `terraform init` unless a lock file already exists.
    /// Returns whether init actually ran.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<bool, TerraformError> {
        if tokio::fs::try_exists(self.lock_path()).await? {
            return Ok(false);
        }
        if let Some(cache) = &self.plugin_cache_dir {
            tokio::fs::create_dir_all(cache).await?;
        }
        self.run_plain(&["init", "-input=false", "-no-color"], cancel)
            .await?;
        tracing::info!(dir = %self.dir.display(), "terraform workspace initialised");
        Ok(true)
    }

    pub async fn apply(&self, cancel: &CancellationToken) -> Result<(), TerraformError> {
        self.run_json(&["apply", "-auto-approve", "-json", "-input=false"], cancel)
            .await
            .map(drop)
    }

    /// Reconcile local state with the real object without changing it.
    pub async fn refresh_only(&self, cancel: &CancellationToken) -> Result<(), TerraformError> {
        self.run_json(
            &["apply", "-refresh-only", "-auto-approve", "-json", "-input=false"],
            cancel,
        )
        .await
        .map(drop)
    }

    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<(), TerraformError> {
        self.run_json(&["destroy", "-auto-approve", "-json", "-input=false"], cancel)
            .await
            .map(drop)
    }

    /// Plan without applying; returns the planned values of the resource.
    /// Values Terraform cannot know until apply are absent.
    pub async fn plan(
        &self,
        tf: &TfResource<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<Map<String, Value>>, TerraformError> {
        let out = format!("-out={PLAN_FILE}");
        self.run_json(&["plan", "-json", "-input=false", out.as_str()], cancel)
            .await?;
        let doc = self.show(&["show", "-json", PLAN_FILE], cancel).await?;
        Ok(resource_values(&doc, "planned_values", &tf.address()))
    }

    /// Current values recorded in the workspace state, `None` if the
    /// resource is not in state.
    pub async fn show_state(
        &self,
        tf: &TfResource<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<Map<String, Value>>, TerraformError> {
        let doc = self.show(&["show", "-json"], cancel).await?;
        Ok(resource_values(&doc, "values", &tf.address()))
    }

    pub async fn import(
        &self,
        tf: &TfResource<'_>,
        import_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TerraformError> {
        let address = tf.address();
        self.run_plain(
            &["import", "-input=false", "-no-color", address.as_str(), import_id],
            cancel,
        )
        .await
        .map(drop)
    }

    /// Seed `terraform.tfstate` from the last known values of `tf`, so a
    /// refresh compares the real object against what was last observed.
    /// An existing lineage is kept and the serial bumped.
    pub async fn write_tfstate(&self, tf: &TfResource<'_>) -> Result<(), TerraformError> {
        let (lineage, serial) = match tokio::fs::read(self.state_path()).await {
            Ok(bytes) => {
                let existing: Value = serde_json::from_slice(&bytes)?;
                let lineage = existing
                    .get("lineage")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let serial = existing.get("serial").and_then(Value::as_u64).unwrap_or(0);
                (lineage, serial + 1)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (None, 1),
            Err(e) => return Err(e.into()),
        };
        let lineage = lineage.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let state = json!({
            "version": 4,
            "terraform_version": "1.0.0",
            "serial": serial,
            "lineage": lineage,
            "outputs": {},
            "resources": [{
                "mode": "managed",
                "type": tf.type_name,
                "name": RESOURCE_NAME,
                "provider": tf.provider.state_reference(),
                "instances": [{
                    "schema_version": 0,
                    "attributes": tf.known_values(),
                }],
            }],
        });

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.state_path(), to_canonical_vec(&state)?).await?;
        tracing::debug!(dir = %self.dir.display(), serial, "terraform state seeded");
        Ok(())
    }

    /// The provider as pinned by the lock file, or `requested` when the lock
    /// file does not mention it.
    pub async fn locked_provider(&self, requested: &ProviderAddr) -> Result<ProviderAddr, TerraformError> {
        let contents = match tokio::fs::read_to_string(self.lock_path()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(requested.clone()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_lock_file(&contents)
            .into_iter()
            .find(|p| p.source() == requested.source())
            .unwrap_or_else(|| requested.clone()))
    }

    /// Delete the workspace directory.
    pub async fn remove(&self) -> Result<(), TerraformError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(&self.dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0");
        if let Some(cache) = &self.plugin_cache_dir {
            cmd.env("TF_PLUGIN_CACHE_DIR", cache);
        }
        cmd
    }

    async fn exec(&self, args: &[&str], cancel: &CancellationToken) -> Result<CommandOutput, TerraformError> {
        tracing::debug!(dir = %self.dir.display(), args = ?args, "running terraform");
        Ok(run_command(self.command(args), None, cancel).await?)
    }

    /// Run a `-json` subcommand. The first error diagnostic wins over the
    /// exit status.
    async fn run_json(&self, args: &[&str], cancel: &CancellationToken) -> Result<String, TerraformError> {
        let output = self.exec(args, cancel).await?;
        let stdout = output.stdout_str();
        if let Some(diagnostic) = first_error(&stdout).or_else(|| first_error(&output.stderr_str())) {
            return Err(TerraformError::Diagnostic {
                summary: diagnostic.summary,
                detail: diagnostic.detail,
            });
        }
        check_status(args, &output)?;
        Ok(stdout)
    }

    async fn run_plain(&self, args: &[&str], cancel: &CancellationToken) -> Result<String, TerraformError> {
        let output = self.exec(args, cancel).await?;
        check_status(args, &output)?;
        Ok(output.stdout_str())
    }

    async fn show(&self, args: &[&str], cancel: &CancellationToken) -> Result<Value, TerraformError> {
        let stdout = self.run_plain(args, cancel).await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| TerraformError::UnexpectedOutput(format!("terraform show: {e}")))
    }
}

fn check_status(args: &[&str], output: &CommandOutput) -> Result<(), TerraformError> {
    if output.success() {
        return Ok(());
    }
    Err(TerraformError::Failed {
        subcommand: args.first().copied().unwrap_or_default().to_string(),
        status: output.status.to_string(),
        stderr: output.stderr_str(),
    })
}

/// `<root_key>.root_module.resources[address == ..].values` of a
/// `terraform show -json` document.
pub fn resource_values(doc: &Value, root_key: &str, address: &str) -> Option<Map<String, Value>> {
    doc.get(root_key)?
        .get("root_module")?
        .get("resources")?
        .as_array()?
        .iter()
        .find(|r| r.get("address").and_then(Value::as_str) == Some(address))?
        .get("values")?
        .as_object()
        .cloned()
}
