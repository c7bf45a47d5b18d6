//! Selector-addressed rewriting of tree-shaped documents.
//!
//! A document only has to expose map-like nodes through [`DocMap`]; the walk
//! in [`replace_in`] is shared by every serialization format. A selector that
//! does not exist in a document is skipped rather than reported, since the
//! same selector is applied to documents that may not carry that path.
//!
//! ```text
//! selector "image.repository"          document
//!                                      image:
//!   "image"      → get_mut, as_child     repository: nginx   ← set
//!   "repository" → set                   tag: "1.25"
//! ```

mod json;
mod yaml;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use cnab_reloc_core::error::{RelocError, Result};

pub use json::JsonReplacer;
pub use yaml::YamlReplacer;

/// A map-like node of a tree document.
pub trait DocMap {
    /// Value type stored under keys.
    type Value;

    /// Mutable access to the value under `key`, if present.
    fn get_mut(&mut self, key: &str) -> Option<&mut Self::Value>;

    /// Store `value` under `key`, overwriting any previous value.
    fn set(&mut self, key: &str, value: Self::Value);

    /// View `value` as a map-like node, if it is one.
    fn as_child(value: &mut Self::Value) -> Option<&mut Self>;
}

/// Path to one field of a document: an ordered list of keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    keys: Vec<String>,
}

impl Selector {
    /// Delimiter used by [`Selector::parse`].
    pub const DEFAULT_DELIMITER: char = '.';

    /// Split `path` on `.`.
    pub fn parse(path: &str) -> Self {
        Self::parse_with(path, Self::DEFAULT_DELIMITER)
    }

    /// Split `path` on `delimiter`. An empty path selects nothing.
    pub fn parse_with(path: &str, delimiter: char) -> Self {
        if path.is_empty() {
            return Self::default();
        }
        Self {
            keys: path.split(delimiter).map(str::to_string).collect(),
        }
    }

    /// Build a selector from explicit keys, which may contain the delimiter.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Selector for `key` under this one.
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut keys = self.keys.clone();
        keys.push(key.into());
        Self { keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromStr for Selector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let delimiter = Self::DEFAULT_DELIMITER.to_string();
        f.write_str(&self.keys.join(&delimiter))
    }
}

/// Set the field addressed by `selector` to `value`.
///
/// Descends through every key but the last; if an intermediate key is
/// missing or its value is not map-like, nothing is changed. Returns whether
/// the value was written.
pub fn replace_in<M: DocMap + ?Sized>(doc: &mut M, selector: &Selector, value: M::Value) -> bool {
    let Some((last, parents)) = selector.keys().split_last() else {
        return false;
    };

    let mut node = doc;
    for key in parents {
        let Some(child) = node.get_mut(key) else {
            return false;
        };
        let Some(child) = M::as_child(child) else {
            return false;
        };
        node = child;
    }

    node.set(last, value);
    true
}

/// Rewrites one field of a serialized document.
pub trait Replacer {
    /// Parse `source`, set the field at `selector` to the string `value`,
    /// and serialize the result. Untouched fields survive unchanged.
    fn replace(&self, source: &str, selector: &Selector, value: &str) -> Result<String>;
}

/// Serialization formats with a [`Replacer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(DocumentFormat::Json),
            Some("yaml") | Some("yml") => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }

    pub fn replacer(&self) -> Box<dyn Replacer> {
        match self {
            DocumentFormat::Json => Box::new(JsonReplacer),
            DocumentFormat::Yaml => Box::new(YamlReplacer),
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = RelocError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(DocumentFormat::Json),
            "yaml" | "yml" => Ok(DocumentFormat::Yaml),
            other => Err(RelocError::ConfigError(format!(
                "unknown document format '{}': expected json or yaml",
                other
            ))),
        }
    }
}

/// Rewrite one field of the document at `path` in place.
pub fn replace_file(
    path: &Path,
    format: DocumentFormat,
    selector: &Selector,
    value: &str,
) -> Result<()> {
    let source = std::fs::read_to_string(path).map_err(|e| RelocError::LoadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let rewritten = format.replacer().replace(&source, selector, value)?;
    crate::bundle_file::write_atomic(path, rewritten.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Minimal in-memory document used to exercise the shared walk.
    #[derive(Debug, Default, PartialEq)]
    struct Node(BTreeMap<String, Entry>);

    #[derive(Debug, PartialEq)]
    enum Entry {
        Leaf(String),
        Map(Node),
    }

    impl DocMap for Node {
        type Value = Entry;

        fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
            self.0.get_mut(key)
        }

        fn set(&mut self, key: &str, value: Entry) {
            self.0.insert(key.to_string(), value);
        }

        fn as_child(value: &mut Entry) -> Option<&mut Node> {
            match value {
                Entry::Map(node) => Some(node),
                Entry::Leaf(_) => None,
            }
        }
    }

    fn leaf(s: &str) -> Entry {
        Entry::Leaf(s.to_string())
    }

    fn sample() -> Node {
        let mut inner = Node::default();
        inner.set("repository", leaf("nginx"));
        let mut root = Node::default();
        root.set("image", Entry::Map(inner));
        root.set("name", leaf("web"));
        root
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(Selector::parse("a.b.c").keys(), &["a", "b", "c"]);
        assert_eq!(Selector::parse_with("a/b", '/').keys(), &["a", "b"]);
        assert!(Selector::parse("").is_empty());
        assert_eq!(Selector::parse("a").to_string(), "a");
    }

    #[test]
    fn test_selector_from_keys_and_child() {
        let s = Selector::from_keys(["images", "web.frontend"]).child("image");
        assert_eq!(s.keys(), &["images", "web.frontend", "image"]);
    }

    #[test]
    fn test_replace_nested() {
        let mut doc = sample();
        assert!(replace_in(&mut doc, &Selector::parse("image.repository"), leaf("example.com/nginx")));
        let Entry::Map(ref inner) = doc.0["image"] else {
            panic!("image should stay a map");
        };
        assert_eq!(inner.0["repository"], leaf("example.com/nginx"));
    }

    #[test]
    fn test_replace_adds_missing_final_key() {
        let mut doc = sample();
        assert!(replace_in(&mut doc, &Selector::parse("image.tag"), leaf("1.25")));
        let Entry::Map(ref inner) = doc.0["image"] else {
            panic!("image should stay a map");
        };
        assert_eq!(inner.0["tag"], leaf("1.25"));
    }

    #[test]
    fn test_replace_missing_parent_is_noop() {
        let mut doc = sample();
        assert!(!replace_in(&mut doc, &Selector::parse("missing.repository"), leaf("x")));
        assert_eq!(doc, sample());
    }

    #[test]
    fn test_replace_through_leaf_is_noop() {
        let mut doc = sample();
        assert!(!replace_in(&mut doc, &Selector::parse("name.first"), leaf("x")));
        assert_eq!(doc, sample());
    }

    #[test]
    fn test_replace_empty_selector_is_noop() {
        let mut doc = sample();
        assert!(!replace_in(&mut doc, &Selector::default(), leaf("x")));
        assert_eq!(doc, sample());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(Path::new("bundle.json")), Some(DocumentFormat::Json));
        assert_eq!(DocumentFormat::from_path(Path::new("values.yml")), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_path(Path::new("values.yaml")), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("YAML".parse::<DocumentFormat>().unwrap(), DocumentFormat::Yaml);
        assert!("toml".parse::<DocumentFormat>().is_err());
    }

    #[test]
    fn test_replace_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("values.yaml");
        std::fs::write(&path, "image:\n  repository: nginx\n  tag: \"1.25\"\nreplicas: 2\n").unwrap();

        replace_file(
            &path,
            DocumentFormat::Yaml,
            &Selector::parse("image.repository"),
            "example.com/user/nginx",
        )
        .unwrap();

        let doc: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["image"]["repository"].as_str(), Some("example.com/user/nginx"));
        assert_eq!(doc["image"]["tag"].as_str(), Some("1.25"));
        assert_eq!(doc["replicas"].as_u64(), Some(2));
    }
}
