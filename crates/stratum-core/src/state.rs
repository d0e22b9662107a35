use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Applied state of one stack, indexed by resource id.
///
/// Mutated only by the executor, one resource at a time; `serial` grows by
/// one with every mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<jiff::Timestamp>,
}

impl State {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn upsert(&mut self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
        self.touch();
    }

    /// Remove an entry. Returns the removed resource, if it was present.
    pub fn remove(&mut self, id: &str) -> Option<Resource> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.modified_at = Some(jiff::Timestamp::now());
    }
}
