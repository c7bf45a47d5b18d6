//! JSON adapter, used for bundle descriptors.
//!
//! Arrays count as map-like here: their keys are decimal indices, which is
//! how `invocationImages.0.image` reaches into the invocation image list.
//! Setting an index past the end of an array does nothing.

use serde_json::Value;

use cnab_reloc_core::error::Result;

use super::{replace_in, DocMap, Replacer, Selector};

impl DocMap for Value {
    type Value = Value;

    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Object(map) => map.get_mut(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: Value) {
        match self {
            Value::Object(map) => {
                map.insert(key.to_string(), value);
            }
            Value::Array(items) => {
                if let Some(slot) = key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    *slot = value;
                }
            }
            _ => {}
        }
    }

    fn as_child(value: &mut Value) -> Option<&mut Value> {
        match value {
            Value::Object(_) | Value::Array(_) => Some(value),
            _ => None,
        }
    }
}

/// Replacer for JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReplacer;

impl Replacer for JsonReplacer {
    fn replace(&self, source: &str, selector: &Selector, value: &str) -> Result<String> {
        let mut doc: Value = serde_json::from_str(source)?;
        if !replace_in(&mut doc, selector, Value::String(value.to_string())) {
            tracing::debug!(selector = %selector, "Selector not present in JSON document");
        }
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}
