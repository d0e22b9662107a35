use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the Terraform plane finds its binary and lays out workspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerraformConfig {
    /// `terraform` executable, resolved through `PATH` when relative.
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Parent of every per-resource workspace directory.
    pub workspace_root: PathBuf,
    /// Exported as `TF_PLUGIN_CACHE_DIR` so workspaces share provider downloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_cache_dir: Option<PathBuf>,
}

fn default_binary() -> PathBuf {
    PathBuf::from("terraform")
}

impl TerraformConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: default_binary(),
            workspace_root: workspace_root.into(),
            plugin_cache_dir: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_plugin_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_cache_dir = Some(dir.into());
        self
    }
}
