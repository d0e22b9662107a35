use std::path::{Path, PathBuf};

use stratum_core::id::resource_key;
use stratum_core::{Resource, State};

use crate::error::StorageError;
use crate::{BoxFuture, StateStorage};

/// State kept as one JSON file per stack under a local directory:
/// `<root>/<stack>/state.json`.
pub struct LocalStateStorage {
    root: PathBuf,
}

impl LocalStateStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self, stack: &str) -> PathBuf {
        self.root.join(resource_key(stack)).join("state.json")
    }

    async fn load(&self, stack: &str) -> Result<State, StorageError> {
        let path = self.state_path(stack);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state: State = serde_json::from_slice(&bytes)?;
                tracing::debug!(path = %path.display(), "state loaded from local disk");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(stack = %stack, "no existing state found, starting fresh");
                Ok(State::new(stack))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write: tmp file + rename.
    async fn flush(&self, state: &State) -> Result<(), StorageError> {
        let path = self.state_path(&state.stack);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::debug!(path = %path.display(), serial = state.serial, "state flushed to local disk");
        Ok(())
    }
}

impl StateStorage for LocalStateStorage {
    fn get<'a>(&'a self, stack: &'a str) -> BoxFuture<'a, Result<State, StorageError>> {
        Box::pin(self.load(stack))
    }

    fn upsert<'a>(
        &'a self,
        stack: &'a str,
        resource: &'a Resource,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut state = self.load(stack).await?;
            state.upsert(resource.clone());
            self.flush(&state).await
        })
    }

    fn delete<'a>(&'a self, stack: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut state = self.load(stack).await?;
            if state.remove(id).is_some() {
                self.flush(&state).await?;
            }
            Ok(())
        })
    }

    fn set_operator<'a>(
        &'a self,
        stack: &'a str,
        operator: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut state = self.load(stack).await?;
            state.operator = Some(operator.to_string());
            self.flush(&state).await
        })
    }
}
