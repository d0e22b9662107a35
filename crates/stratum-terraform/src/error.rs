use thiserror::Error;

use stratum_engine::RuntimeError;

#[derive(Debug, Error)]
pub enum TerraformError {
    #[error("{summary}: {detail}")]
    Diagnostic { summary: String, detail: String },

    #[error("terraform {subcommand} exited with {status}: {stderr}")]
    Failed {
        subcommand: String,
        status: String,
        stderr: String,
    },

    #[error("invalid provider address {address:?}: {reason}")]
    InvalidProvider { address: String, reason: String },

    #[error("resource {id} is missing the {key:?} extension")]
    MissingExtension { id: String, key: &'static str },

    #[error("unexpected terraform output: {0}")]
    UnexpectedOutput(String),

    #[error(transparent)]
    Process(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TerraformError> for RuntimeError {
    fn from(err: TerraformError) -> Self {
        match err {
            TerraformError::Diagnostic { summary, detail } => {
                RuntimeError::Diagnostic { summary, detail }
            }
            TerraformError::Process(inner) => inner,
            TerraformError::Io(e) => RuntimeError::Io(e),
            TerraformError::Serialization(e) => RuntimeError::Serialization(e),
            TerraformError::MissingExtension { ref id, .. } => RuntimeError::InvalidResource {
                resource_id: id.clone(),
                reason: err.to_string(),
            },
            other @ (TerraformError::InvalidProvider { .. } | TerraformError::UnexpectedOutput(_)) => {
                RuntimeError::Api(other.to_string())
            }
            TerraformError::Failed {
                subcommand,
                status,
                stderr,
            } => RuntimeError::Command {
                program: format!("terraform {subcommand}"),
                message: format!("{status}: {stderr}"),
            },
        }
    }
}
