use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::id;

/// Tag selecting which runtime plane manages a resource.
///
/// Serialized as its bare tag string. Unknown tags are kept verbatim in
/// [`ResourceType::Custom`] so that a registry can still report them as
/// unresolved instead of failing deserialization of the whole spec.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    Kubernetes,
    Terraform,
    Custom(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Kubernetes => "Kubernetes",
            Self::Terraform => "Terraform",
            Self::Custom(tag) => tag,
        }
    }
}

impl From<String> for ResourceType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "Kubernetes" => Self::Kubernetes,
            "Terraform" => Self::Terraform,
            _ => Self::Custom(tag),
        }
    }
}

impl From<&str> for ResourceType {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<ResourceType> for String {
    fn from(ty: ResourceType) -> Self {
        ty.as_str().to_string()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single managed infrastructure unit.
///
/// `attributes` is the declared body handed to the runtime; `extensions`
/// carries backend metadata (provider address, observed live values) that
/// never takes part in change classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<ResourceType>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes,
            depends_on: Vec::new(),
            extensions: Map::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).and_then(Value::as_str)
    }
}

/// Desired-state resource list for one stack, as produced by the compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Spec {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }

    /// Check every id is well formed and unique.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::with_capacity(self.resources.len());
        for resource in &self.resources {
            id::validate(&resource.id)?;
            if !seen.insert(resource.id.as_str()) {
                return Err(CoreError::DuplicateResourceId(resource.id.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CoreError> {
        let spec: Self = serde_json::from_slice(bytes)?;
        spec.validate()?;
        Ok(spec)
    }
}
