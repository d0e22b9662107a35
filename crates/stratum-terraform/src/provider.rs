//! Provider addresses and `.terraform.lock.hcl` parsing.

use std::fmt;
use std::str::FromStr;

use crate::error::TerraformError;

pub const DEFAULT_HOSTNAME: &str = "registry.terraform.io";

/// Fully qualified provider address plus an optional version,
/// e.g. `registry.terraform.io/hashicorp/local/2.2.3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAddr {
    pub hostname: String,
    pub namespace: String,
    pub type_name: String,
    pub version: Option<String>,
}

impl ProviderAddr {
    /// `hostname/namespace/type`, the form used by `required_providers`.
    pub fn source(&self) -> String {
        format!("{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }

    /// Local name used for `provider` blocks and resource type prefixes.
    pub fn local_name(&self) -> &str {
        &self.type_name
    }

    /// The provider reference Terraform writes into state files.
    pub fn state_reference(&self) -> String {
        format!("provider[\"{}\"]", self.source())
    }
}

impl FromStr for ProviderAddr {
    type Err = TerraformError;

    /// Accepts `[hostname/]namespace/type[/version]`. A version segment is
    /// recognised by its leading digit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TerraformError::InvalidProvider {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let version = match parts.last() {
            Some(last) if parts.len() >= 3 && last.starts_with(|c: char| c.is_ascii_digit()) => {
                parts.pop().map(str::to_string)
            }
            _ => None,
        };

        let (hostname, namespace, type_name) = match parts.as_slice() {
            [namespace, type_name] => (DEFAULT_HOSTNAME, *namespace, *type_name),
            [hostname, namespace, type_name] => (*hostname, *namespace, *type_name),
            _ => return Err(invalid("expected [hostname/]namespace/type[/version]")),
        };

        Ok(Self {
            hostname: hostname.to_string(),
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            version,
        })
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source())?;
        if let Some(version) = &self.version {
            write!(f, "/{version}")?;
        }
        Ok(())
    }
}

/// Providers pinned by a lock file, in file order.
///
/// Only the `provider "<source>" { version = "<v>" }` shape is read; hashes
/// and constraints are ignored.
pub fn parse_lock_file(contents: &str) -> Vec<ProviderAddr> {
    let mut providers = Vec::new();
    let mut current: Option<ProviderAddr> = None;

    for line in contents.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("provider ") {
            let source = rest.trim_end_matches('{').trim().trim_matches('"');
            current = source.parse().ok();
        } else if line == "}" {
            if let Some(provider) = current.take() {
                providers.push(provider);
            }
        } else if let Some(value) = line.strip_prefix("version")
            && let Some(provider) = current.as_mut()
            && let Some(value) = value.trim_start().strip_prefix('=')
        {
            provider.version = Some(value.trim().trim_matches('"').to_string());
        }
    }
    providers
}
