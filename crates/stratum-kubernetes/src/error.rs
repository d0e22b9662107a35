use thiserror::Error;

use stratum_engine::RuntimeError;

#[derive(Debug, Error)]
pub enum KubectlError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid resource id {id:?}: expected apiVersion:kind[:namespace]:name")]
    InvalidId { id: String },

    #[error(transparent)]
    Process(#[from] RuntimeError),

    #[error("unexpected kubectl output: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<KubectlError> for RuntimeError {
    fn from(err: KubectlError) -> Self {
        match err {
            KubectlError::Process(inner) => inner,
            // Raw stderr, as kubectl printed it.
            KubectlError::Failed(stderr) => RuntimeError::Api(stderr),
            other => RuntimeError::Api(other.to_string()),
        }
    }
}
