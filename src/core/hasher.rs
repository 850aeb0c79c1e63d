//! BLAKE3 content hashes for resources and templates.
//!
//! Hashes are taken over a canonical JSON rendering (object keys sorted at
//! every level) so that declaration order never shows up as a change.

use super::template::{CfnResource, Template};
use serde_json::{Map, Value};

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for k in keys {
                sorted.insert(k.clone(), canonical(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn hash_value(value: &Value) -> String {
    hash_string(&canonical(value).to_string())
}

/// Hash everything CloudFormation compares for a resource: type, properties,
/// explicit dependencies and removal policies.
pub fn hash_resource(resource: &CfnResource) -> String {
    match serde_json::to_value(resource) {
        Ok(v) => hash_value(&v),
        Err(_) => hash_string(&resource.resource_type),
    }
}

/// Hash a whole template.
pub fn hash_template(template: &Template) -> String {
    match serde_json::to_value(template) {
        Ok(v) => hash_value(&v),
        Err(_) => hash_string(""),
    }
}
