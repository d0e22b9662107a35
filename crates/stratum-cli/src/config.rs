use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stratum_kubernetes::KubernetesConfig;
use stratum_terraform::TerraformConfig;

/// Current config version. Bump this when adding fields or changing shape.
/// Each bump requires a corresponding entry in [`migrate`].
const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StratumConfig {
    /// Schema version. Missing or 0 = pre-versioned config.
    #[serde(default)]
    pub config_version: u32,
    /// Where stack state lives; a local directory under the user data dir
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<StateBackend>,
    #[serde(default)]
    pub terraform: TerraformSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Read every deleted resource back and fail the step if it still exists.
    #[serde(default)]
    pub confirm_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateBackend {
    Local {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
        region: String,
        #[serde(default)]
        credentials: CredentialSource,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    Inline {
        access_key_id: String,
        secret_access_key: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        session_token: Option<String>,
    },
    Profile {
        profile_name: String,
    },
    #[default]
    DefaultChain,
}

impl CredentialSource {
    /// Human-readable description with secrets redacted.
    pub fn describe(&self) -> String {
        match self {
            Self::Inline {
                access_key_id,
                session_token,
                ..
            } => {
                let kind = if session_token.is_some() { "temporary" } else { "inline" };
                format!("{kind} ({})", redact_access_key(access_key_id))
            }
            Self::Profile { profile_name } => format!("profile {profile_name}"),
            Self::DefaultChain => "default chain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerraformSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_interval_ms: Option<u64>,
}

impl StratumConfig {
    pub fn backend_or_default(&self, data_dir: &Path) -> StateBackend {
        self.backend.clone().unwrap_or_else(|| StateBackend::Local {
            path: data_dir.join("state"),
        })
    }

    pub fn terraform_config(&self, data_dir: &Path) -> TerraformConfig {
        let settings = &self.terraform;
        let root = settings
            .workspace_root
            .clone()
            .unwrap_or_else(|| data_dir.join("workspaces"));
        let mut config = TerraformConfig::new(root);
        if let Some(binary) = &settings.binary {
            config = config.with_binary(binary);
        }
        if let Some(cache) = &settings.plugin_cache_dir {
            config = config.with_plugin_cache(cache);
        }
        config
    }

    pub fn kubernetes_config(&self) -> KubernetesConfig {
        let settings = &self.kubernetes;
        let mut config = KubernetesConfig::default();
        if let Some(binary) = &settings.binary {
            config = config.with_binary(binary);
        }
        if let Some(context) = &settings.context {
            config = config.with_context(context);
        }
        if let Some(kubeconfig) = &settings.kubeconfig {
            config = config.with_kubeconfig(kubeconfig);
        }
        if let Some(ms) = settings.watch_interval_ms {
            config = config.with_watch_interval(Duration::from_millis(ms));
        }
        config
    }
}

pub fn config_dir() -> eyre::Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre::eyre!("no config directory found"))?;
    Ok(base.join("stratum"))
}

pub fn data_dir() -> eyre::Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("no data directory found"))?;
    Ok(base.join("stratum"))
}

pub fn default_config_path() -> eyre::Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load the config at `explicit`, or the default one. An explicit path must
/// exist; a missing default config yields built-in defaults.
pub fn load(explicit: Option<&Path>) -> eyre::Result<StratumConfig> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let path = default_config_path()?;
            if path.exists() {
                load_config(&path)
            } else {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(StratumConfig::default())
            }
        }
    }
}

/// Read, migrate and parse one config file. A migrated config is written
/// back in its current shape.
pub fn load_config(path: &Path) -> eyre::Result<StratumConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("failed to read config at {}: {e}", path.display()))?;

    // Parse as raw JSON so we can run migrations before deserializing.
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let raw_version = json
        .get("config_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let on_disk_version = u32::try_from(raw_version).map_err(|_| {
        eyre::eyre!(
            "config_version {raw_version} is newer than this build supports ({CURRENT_VERSION}). \
             Please update stratum."
        )
    })?;

    let migrated = migrate(json, on_disk_version)?;
    let config: StratumConfig = serde_json::from_value(migrated)?;

    if on_disk_version < CURRENT_VERSION {
        save_config(path, &config)?;
    }
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
/// Each migration is a pure transform on the raw JSON value.
fn migrate(mut json: serde_json::Value, from_version: u32) -> eyre::Result<serde_json::Value> {
    if from_version > CURRENT_VERSION {
        return Err(eyre::eyre!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION}). \
             Please update stratum."
        ));
    }

    // v0 -> v1: top-level state_dir becomes a local backend
    if from_version < 1 {
        let obj = json
            .as_object_mut()
            .ok_or_else(|| eyre::eyre!("config is not a JSON object"))?;
        if let Some(dir) = obj.remove("state_dir") {
            obj.entry("backend")
                .or_insert(serde_json::json!({"type": "local", "path": dir}));
        }
        obj.insert("config_version".to_string(), serde_json::Value::Number(1.into()));
        tracing::info!("migrated config v0 -> v1 (state_dir moved into backend)");
    }

    Ok(json)
}

pub fn save_config(path: &Path, config: &StratumConfig) -> eyre::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| eyre::eyre!("config path {} has no parent", path.display()))?;
    std::fs::create_dir_all(dir)?;

    // Always write the current version, regardless of what was loaded.
    let mut stamped = config.clone();
    stamped.config_version = CURRENT_VERSION;
    let json = serde_json::to_string_pretty(&stamped)?;

    // Write to a temp file then rename for atomicity
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json.as_bytes())?;

    // Inline credentials may be stored here
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;

    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

fn redact_access_key(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return "****".to_string();
    }
    let prefix = &key[..4];
    let suffix = &key[key.len() - 4..];
    format!("{prefix}...{suffix}")
}
