//! Per-method affinity configuration and affinity-key extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a method does with the affinity key it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AffinityCommand {
    /// The response carries new keys to bind to the call's channel.
    Bind,
    /// The request carries a key to release after the call.
    Unbind,
    /// The request carries a key that selects the channel.
    Bound,
}

/// Affinity behaviour of one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodAffinity {
    pub command: AffinityCommand,
    /// Dotted field path locating the key inside the message, e.g. `session.name`.
    pub affinity_key: String,
}

/// Anything an affinity key can be read out of.
pub trait AffinityKeySource {
    /// String values found at the dotted `path`.
    ///
    /// Each segment selects a field. The last segment must select a string;
    /// earlier segments must select a nested message, or a list of nested
    /// messages which are searched one by one. Anything else yields nothing.
    fn field_values(&self, path: &str) -> Vec<String>;
}

impl AffinityKeySource for Value {
    fn field_values(&self, path: &str) -> Vec<String> {
        let mut keys = Vec::new();
        collect_json_keys(self, path, &mut keys);
        keys
    }
}

fn collect_json_keys(message: &Value, path: &str, keys: &mut Vec<String>) {
    let Value::Object(fields) = message else {
        return;
    };
    let (name, rest) = match path.split_once('.') {
        Some((name, rest)) => (name, Some(rest)),
        None => (path, None),
    };
    let Some(field) = fields.get(name) else {
        return;
    };

    match (field, rest) {
        // Unset proto3 strings are empty and never act as keys.
        (Value::String(key), None) if !key.is_empty() => keys.push(key.clone()),
        (Value::Object(_), Some(rest)) => collect_json_keys(field, rest, keys),
        (Value::Array(items), Some(rest)) => {
            for item in items.iter().filter(|item| item.is_object()) {
                collect_json_keys(item, rest, keys);
            }
        }
        _ => {}
    }
}
