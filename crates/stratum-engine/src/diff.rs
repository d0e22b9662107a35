use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use stratum_core::{ActionType, Resource};

/// Classify the transition from `prior` to `planned`.
///
/// Two resources are equivalent when their type tags and attribute maps are
/// equal. Object key order never matters; array order does.
pub fn classify(prior: Option<&Resource>, planned: Option<&Resource>) -> ActionType {
    match (prior, planned) {
        (None, Some(_)) => ActionType::Create,
        (Some(_), None) => ActionType::Delete,
        (Some(prior), Some(planned)) if is_equivalent(prior, planned) => ActionType::UnChange,
        (Some(_), Some(_)) => ActionType::Update,
        (None, None) => ActionType::Undefined,
    }
}

pub fn is_equivalent(a: &Resource, b: &Resource) -> bool {
    a.resource_type == b.resource_type && a.attributes == b.attributes
}

/// One attribute that differs between prior and planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Dotted path into the attribute tree, e.g. `metadata.labels.app`.
    pub path: String,
    /// Value in the prior state; `None` if the field is being added.
    pub before: Option<Value>,
    /// Planned value; `None` if the field is being removed.
    pub after: Option<Value>,
}

/// Field-level differences, sorted by path. Nested objects are walked;
/// arrays and scalars are compared whole.
pub fn diff_fields(prior: Option<&Resource>, planned: Option<&Resource>) -> Vec<FieldDiff> {
    let empty = Map::new();
    let before = prior.map_or(&empty, |r| &r.attributes);
    let after = planned.map_or(&empty, |r| &r.attributes);

    let mut diffs = Vec::new();
    if let (Some(prior), Some(planned)) = (prior, planned)
        && prior.resource_type != planned.resource_type
    {
        diffs.push(FieldDiff {
            path: "type".to_string(),
            before: Some(Value::String(prior.resource_type.to_string())),
            after: Some(Value::String(planned.resource_type.to_string())),
        });
    }
    walk("", before, after, &mut diffs);
    diffs
}

fn walk(prefix: &str, before: &Map<String, Value>, after: &Map<String, Value>, out: &mut Vec<FieldDiff>) {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match (before.get(key), after.get(key)) {
            (Some(Value::Object(b)), Some(Value::Object(a))) => walk(&path, b, a, out),
            (b, a) if b != a => out.push(FieldDiff {
                path,
                before: b.cloned(),
                after: a.cloned(),
            }),
            _ => {}
        }
    }
}
