use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::KubectlError;

/// Identity of one API object, derived from its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn from_manifest(manifest: &Map<String, Value>) -> Result<Self, KubectlError> {
        let field = |value: Option<&Value>, what: &str| {
            value
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| KubectlError::InvalidManifest(format!("missing {what}")))
        };
        let metadata = manifest.get("metadata");

        Ok(Self {
            api_version: field(manifest.get("apiVersion"), "apiVersion")?,
            kind: field(manifest.get("kind"), "kind")?,
            name: field(metadata.and_then(|m| m.get("name")), "metadata.name")?,
            namespace: metadata
                .and_then(|m| m.get("namespace"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    /// `apiVersion:kind:namespace:name`, or `apiVersion:kind:name` for
    /// cluster-scoped objects.
    pub fn canonical_id(&self) -> String {
        self.to_string()
    }

    /// Resource argument for `kubectl get/delete`: `kind.version.group`
    /// for grouped APIs, plain `kind` for the core group.
    pub fn kubectl_type(&self) -> String {
        match self.api_version.split_once('/') {
            Some((group, version)) => format!("{}.{version}.{group}", self.kind),
            None => self.kind.clone(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}:{}:{ns}:{}", self.api_version, self.kind, self.name),
            None => write!(f, "{}:{}:{}", self.api_version, self.kind, self.name),
        }
    }
}

impl FromStr for ObjectRef {
    type Err = KubectlError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = id.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(KubectlError::InvalidId { id: id.to_string() });
        }
        let (api_version, kind, namespace, name) = match parts.as_slice() {
            [api_version, kind, name] => (api_version, kind, None, name),
            [api_version, kind, namespace, name] => (api_version, kind, Some(namespace.to_string()), name),
            _ => return Err(KubectlError::InvalidId { id: id.to_string() }),
        };
        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace,
            name: name.to_string(),
        })
    }
}

/// Shape `live` like `declared`: declared object keys are kept with their
/// live values, arrays of equal length are projected element-wise, anything
/// else is taken from `live`. Server-populated fields therefore never show
/// up as drift.
pub fn project(declared: &Value, live: &Value) -> Value {
    match (declared, live) {
        (Value::Object(want), Value::Object(have)) => Value::Object(
            want.iter()
                .filter_map(|(key, value)| have.get(key).map(|live| (key.clone(), project(value, live))))
                .collect(),
        ),
        (Value::Array(want), Value::Array(have)) if want.len() == have.len() => {
            Value::Array(want.iter().zip(have).map(|(w, h)| project(w, h)).collect())
        }
        (_, live) => live.clone(),
    }
}
