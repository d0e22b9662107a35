use std::collections::HashMap;
use std::sync::Arc;

use stratum_core::ResourceType;

use crate::error::RuntimeError;
use crate::runtime::Runtime;

pub type RuntimeFactory = Arc<dyn Fn() -> Result<Arc<dyn Runtime>, RuntimeError> + Send + Sync>;

/// Maps a resource type tag to the factory that builds its runtime.
///
/// Registration happens once at startup. Each run calls [`Registry::instantiate`]
/// so every tag gets exactly one runtime instance for the duration of the run.
#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<ResourceType, RuntimeFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, resource_type: ResourceType, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Runtime>, RuntimeError> + Send + Sync + 'static,
    {
        tracing::debug!(resource_type = %resource_type, "runtime registered");
        self.factories.insert(resource_type, Arc::new(factory));
    }

    /// Register an already-built runtime, shared across runs.
    pub fn register_instance(&mut self, resource_type: ResourceType, runtime: Arc<dyn Runtime>) {
        self.register(resource_type, move || Ok(Arc::clone(&runtime)));
    }

    pub fn with<F>(mut self, resource_type: ResourceType, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Runtime>, RuntimeError> + Send + Sync + 'static,
    {
        self.register(resource_type, factory);
        self
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.factories.contains_key(resource_type)
    }

    /// Build one runtime per distinct tag. Unknown tags and factory failures
    /// are recorded, not raised: they fail only the resources that use them.
    pub fn instantiate<'a>(&self, types: impl IntoIterator<Item = &'a ResourceType>) -> RuntimeSet {
        let mut runtimes = HashMap::new();
        for resource_type in types {
            if runtimes.contains_key(resource_type) {
                continue;
            }
            let entry = match self.factories.get(resource_type) {
                Some(factory) => factory().map_err(|e| e.to_string()),
                None => Err("no runtime registered for this type".to_string()),
            };
            if let Err(reason) = &entry {
                tracing::warn!(resource_type = %resource_type, reason = %reason, "runtime unavailable");
            }
            runtimes.insert(resource_type.clone(), entry);
        }
        RuntimeSet { runtimes }
    }
}

/// Runtimes instantiated for a single run.
pub struct RuntimeSet {
    runtimes: HashMap<ResourceType, Result<Arc<dyn Runtime>, String>>,
}

impl RuntimeSet {
    pub fn resolve(&self, resource_type: &ResourceType) -> Result<Arc<dyn Runtime>, RuntimeError> {
        match self.runtimes.get(resource_type) {
            Some(Ok(runtime)) => Ok(Arc::clone(runtime)),
            Some(Err(reason)) => Err(RuntimeError::Dispatch {
                resource_type: resource_type.to_string(),
                reason: reason.clone(),
            }),
            None => Err(RuntimeError::Dispatch {
                resource_type: resource_type.to_string(),
                reason: "runtime was not instantiated for this run".to_string(),
            }),
        }
    }
}
