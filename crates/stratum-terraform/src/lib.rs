//! stratum-terraform
//!
//! Terraform-plane runtime. Each resource gets its own working directory
//! with a generated `main.tf.json`; the `terraform` CLI is driven with
//! `-json` output and its diagnostics are surfaced as runtime errors.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod provider;
pub mod runtime;
pub mod workspace;

use std::sync::Arc;

use stratum_core::ResourceType;
use stratum_engine::Registry;

pub use crate::config::TerraformConfig;
pub use crate::error::TerraformError;
pub use crate::provider::ProviderAddr;
pub use crate::runtime::TerraformRuntime;
pub use crate::workspace::{TfResource, Workspace};

/// Register the Terraform plane. All runs built from this registry share one
/// runtime, and with it one CLI lock.
pub fn register(registry: &mut Registry, config: TerraformConfig) {
    registry.register_instance(ResourceType::Terraform, Arc::new(TerraformRuntime::new(config)));
}
