//! YAML adapter, used for free-form configuration documents.

use serde_yaml::{Mapping, Value};

use cnab_reloc_core::error::Result;

use super::{replace_in, DocMap, Replacer, Selector};

impl DocMap for Mapping {
    type Value = Value;

    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        Mapping::get_mut(self, key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.insert(Value::String(key.to_string()), value);
    }

    fn as_child(value: &mut Value) -> Option<&mut Mapping> {
        value.as_mapping_mut()
    }
}

/// Replacer for YAML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlReplacer;

impl Replacer for YamlReplacer {
    fn replace(&self, source: &str, selector: &Selector, value: &str) -> Result<String> {
        let mut doc: Value = serde_yaml::from_str(source)?;
        let replaced = match doc.as_mapping_mut() {
            Some(root) => replace_in(root, selector, Value::String(value.to_string())),
            None => false,
        };
        if !replaced {
            tracing::debug!(selector = %selector, "Selector not present in YAML document");
        }
        Ok(serde_yaml::to_string(&doc)?)
    }
}
