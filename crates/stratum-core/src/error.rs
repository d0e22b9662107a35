use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid resource id {id:?}: {reason}")]
    InvalidResourceId { id: String, reason: String },

    #[error("duplicate resource id: {0}")]
    DuplicateResourceId(String),
}
