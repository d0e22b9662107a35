use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use stratum_core::{Resource, State};

use crate::error::StorageError;
use crate::{BoxFuture, StateStorage};

/// Process-local state, used for previews and tests.
#[derive(Default)]
pub struct MemoryStateStorage {
    stacks: Mutex<HashMap<String, State>>,
    writes: AtomicUsize,
}

impl MemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stack with an existing state.
    pub fn with_state(state: State) -> Self {
        let storage = Self::default();
        storage.put(state);
        storage
    }

    pub fn put(&self, state: State) {
        self.lock().insert(state.stack.clone(), state);
    }

    /// Snapshot of a stack's state.
    pub fn snapshot(&self, stack: &str) -> State {
        self.lock()
            .get(stack)
            .cloned()
            .unwrap_or_else(|| State::new(stack))
    }

    /// Number of upsert/delete calls that mutated state.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, State>> {
        self.stacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate(&self, stack: &str, f: impl FnOnce(&mut State) -> bool) {
        let mut stacks = self.lock();
        let state = stacks
            .entry(stack.to_string())
            .or_insert_with(|| State::new(stack));
        if f(state) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl StateStorage for MemoryStateStorage {
    fn get<'a>(&'a self, stack: &'a str) -> BoxFuture<'a, Result<State, StorageError>> {
        Box::pin(async move { Ok(self.snapshot(stack)) })
    }

    fn upsert<'a>(
        &'a self,
        stack: &'a str,
        resource: &'a Resource,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.mutate(stack, |state| {
                state.upsert(resource.clone());
                true
            });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, stack: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.mutate(stack, |state| state.remove(id).is_some());
            Ok(())
        })
    }

    fn set_operator<'a>(
        &'a self,
        stack: &'a str,
        operator: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.mutate(stack, |state| {
                state.operator = Some(operator.to_string());
                false
            });
            Ok(())
        })
    }
}
