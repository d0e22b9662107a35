use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_smithy_types::byte_stream::ByteStream;

use stratum_core::id::resource_key;
use stratum_core::{Resource, State};

use crate::error::StorageError;
use crate::{BoxFuture, StateStorage};

/// State kept as one JSON object per stack in S3:
/// `s3://<bucket>/<prefix>/<stack>/state.json`.
///
/// Every mutation is a read-modify-write guarded by ETag preconditions
/// (`If-Match` on update, `If-None-Match: *` on first write), so a second
/// writer racing on the same stack surfaces as [`StorageError::Conflict`]
/// instead of silently losing entries.
pub struct S3StateStorage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3StateStorage {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn state_key(&self, stack: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/state.json", resource_key(stack))
        } else {
            format!("{prefix}/{}/state.json", resource_key(stack))
        }
    }

    /// Load the state and its ETag. `None` ETag means the object does not
    /// exist yet.
    async fn load(&self, stack: &str) -> Result<(State, Option<String>), StorageError> {
        let key = self.state_key(stack);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    tracing::debug!(bucket = %self.bucket, key = %key, "no state in S3, starting fresh");
                    return Ok((State::new(stack), None));
                }
                return Err(StorageError::GetObject(err.to_string()));
            }
        };

        let etag = resp.e_tag().map(String::from);
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::GetObject(e.to_string()))?
            .into_bytes();
        let state: State = serde_json::from_slice(&body)?;

        tracing::debug!(bucket = %self.bucket, key = %key, serial = state.serial, "state loaded from S3");
        Ok((state, etag))
    }

    async fn store(&self, state: &State, etag: Option<&str>) -> Result<(), StorageError> {
        let key = self.state_key(&state.stack);
        let body = serde_json::to_vec_pretty(state)?;

        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(body));
        req = match etag {
            Some(etag) => req.if_match(etag),
            None => req.if_none_match("*"),
        };

        req.send().await.map_err(|e| {
            let err = e.into_service_error();
            match err.code() {
                Some("PreconditionFailed" | "ConditionalRequestConflict") => StorageError::Conflict {
                    stack: state.stack.clone(),
                },
                _ => StorageError::PutObject(err.to_string()),
            }
        })?;

        tracing::debug!(bucket = %self.bucket, key = %key, serial = state.serial, "state flushed to S3");
        Ok(())
    }

    async fn modify(
        &self,
        stack: &str,
        f: impl FnOnce(&mut State) -> bool + Send,
    ) -> Result<(), StorageError> {
        let (mut state, etag) = self.load(stack).await?;
        if f(&mut state) {
            self.store(&state, etag.as_deref()).await?;
        }
        Ok(())
    }

    /// Remove the stack's state object entirely.
    pub async fn purge(&self, stack: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.state_key(stack))
            .send()
            .await
            .map_err(|e| StorageError::DeleteObject(e.into_service_error().to_string()))?;
        Ok(())
    }
}

impl StateStorage for S3StateStorage {
    fn get<'a>(&'a self, stack: &'a str) -> BoxFuture<'a, Result<State, StorageError>> {
        Box::pin(async move { Ok(self.load(stack).await?.0) })
    }

    fn upsert<'a>(
        &'a self,
        stack: &'a str,
        resource: &'a Resource,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.modify(stack, move |state| {
            state.upsert(resource.clone());
            true
        }))
    }

    fn delete<'a>(&'a self, stack: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.modify(stack, move |state| state.remove(id).is_some()))
    }

    fn set_operator<'a>(
        &'a self,
        stack: &'a str,
        operator: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.modify(stack, move |state| {
            state.operator = Some(operator.to_string());
            true
        }))
    }
}
