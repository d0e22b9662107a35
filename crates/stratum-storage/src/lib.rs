//! stratum-storage
//!
//! Durable per-stack state. The engine only sees the [`StateStorage`]
//! contract; where state lives (local disk, S3, memory) is chosen by the
//! caller.

pub mod error;
pub mod local;
pub mod memory;
pub mod s3;

use std::future::Future;
use std::pin::Pin;

use stratum_core::{Resource, State};

pub use crate::error::StorageError;
pub use crate::local::LocalStateStorage;
pub use crate::memory::MemoryStateStorage;
pub use crate::s3::S3StateStorage;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence contract for stack state.
///
/// Implementations do not coordinate writers: callers must ensure at most
/// one write per stack is in flight at any time. The executor does this by
/// funnelling every write of a run through a single lock.
pub trait StateStorage: Send + Sync {
    /// Load the full state of a stack. A stack never written returns an
    /// empty state, not an error.
    fn get<'a>(&'a self, stack: &'a str) -> BoxFuture<'a, Result<State, StorageError>>;

    /// Insert or replace one resource entry.
    fn upsert<'a>(
        &'a self,
        stack: &'a str,
        resource: &'a Resource,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Remove one resource entry. Removing an absent id is not an error.
    fn delete<'a>(&'a self, stack: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Record who is mutating the stack.
    fn set_operator<'a>(
        &'a self,
        stack: &'a str,
        operator: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>>;
}
