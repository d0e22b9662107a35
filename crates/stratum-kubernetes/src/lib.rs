//! stratum-kubernetes
//!
//! Kubernetes-plane runtime driven through `kubectl`. A resource's
//! attributes are the object manifest; its ID is
//! `apiVersion:kind:namespace:name` (namespace omitted when cluster scoped).

pub mod error;
pub mod kubectl;
pub mod object;
pub mod runtime;

use std::sync::Arc;

use stratum_core::ResourceType;
use stratum_engine::Registry;

pub use crate::error::KubectlError;
pub use crate::kubectl::{Kubectl, KubernetesConfig};
pub use crate::object::ObjectRef;
pub use crate::runtime::KubernetesRuntime;

pub fn register(registry: &mut Registry, config: KubernetesConfig) {
    registry.register_instance(ResourceType::Kubernetes, Arc::new(KubernetesRuntime::new(config)));
}
