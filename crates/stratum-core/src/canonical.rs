use serde_json::{Map, Value};

/// Rebuild a JSON value with every object's keys in sorted order.
///
/// Output stays byte-stable whether or not serde_json's `preserve_order`
/// feature is enabled somewhere in the dependency graph.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(canonicalize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonicalize_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let mut out = Map::new();
    for key in keys {
        out.insert(key.clone(), canonicalize(&map[key]));
    }
    out
}

/// Pretty-printed canonical JSON bytes.
pub fn to_canonical_vec(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(&canonicalize(value))
}

/// Compact canonical JSON, no trailing newline.
pub fn to_canonical_string(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonicalize(value))
}
