use thiserror::Error;

use stratum_core::CoreError;
use stratum_storage::StorageError;

/// Run-level failures. Any of these aborts the whole operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid spec: {0}")]
    Spec(#[from] CoreError),

    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("resource {id} depends on {dependency}, which is neither in the spec nor in the prior state")]
    DanglingDependency { id: String, dependency: String },

    #[error("{operation} cannot execute a {action} step ({id})")]
    InvalidStep {
        operation: &'static str,
        action: String,
        id: String,
    },

    #[error("state storage error: {0}")]
    StateStorage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Graph problems detected before anything executes.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Spec(_) | Self::CyclicDependency { .. } | Self::DanglingDependency { .. }
        )
    }
}

/// Per-resource failures reported by (or while resolving) a runtime. These
/// fail one resource and never abort the run.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no runtime available for resource type {resource_type}: {reason}")]
    Dispatch {
        resource_type: String,
        reason: String,
    },

    #[error("{operation} is not supported for {resource_id}")]
    Unsupported {
        operation: &'static str,
        resource_id: String,
    },

    #[error("{summary}: {detail}")]
    Diagnostic { summary: String, detail: String },

    #[error("{0}")]
    Api(String),

    #[error("{program} failed: {message}")]
    Command { program: String, message: String },

    #[error("invalid resource {resource_id}: {reason}")]
    InvalidResource { resource_id: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn invalid(resource_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            resource_id: resource_id.to_string(),
            reason: reason.into(),
        }
    }
}
