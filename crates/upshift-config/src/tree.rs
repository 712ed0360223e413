//! Structured config-tree editing
//!
//! `ConfigDocument` wraps a JSON object and exposes path-addressed reads,
//! splices, and removals plus deterministic re-serialization. All mutation of
//! environment config files goes through this API; the engine never does
//! string surgery on config text.

use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};

/// A dotted path into a config tree (`apps.exampleApp.image`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigPath {
    segments: Vec<String>,
}

impl ConfigPath {
    /// Parse a dotted path. Empty strings and blank segments are rejected.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        if raw.is_empty() {
            return Err(ConfigError::InvalidPath(raw.to_string()));
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::InvalidPath(raw.to_string()));
        }
        Ok(ConfigPath { segments })
    }

    /// Build a path from literal segments (no splitting).
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConfigPath {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Extend with one more segment.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        ConfigPath { segments }
    }
}

impl std::fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// An editable configuration document (JSON object root).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl ConfigDocument {
    /// Parse document text. The top level must be an object.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let root: Value = serde_json::from_str(text)?;
        if !root.is_object() {
            return Err(ConfigError::RootNotObject);
        }
        Ok(ConfigDocument { root })
    }

    /// Empty document (`{}`).
    pub fn empty() -> Self {
        ConfigDocument {
            root: Value::Object(Map::new()),
        }
    }

    /// Wrap an already-parsed object value.
    pub fn from_value(root: Value) -> ConfigResult<Self> {
        if !root.is_object() {
            return Err(ConfigError::RootNotObject);
        }
        Ok(ConfigDocument { root })
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Deterministic serialization: pretty JSON, keys sorted, trailing
    /// newline. Re-serializing an unchanged document is byte-stable.
    pub fn to_pretty_string(&self) -> String {
        // object-rooted Value serialization cannot fail
        let mut text = serde_json::to_string_pretty(&self.root).expect("serialize config value");
        text.push('\n');
        text
    }

    /// Value at a path, if present.
    pub fn get(&self, path: &ConfigPath) -> Option<&Value> {
        value_at(&self.root, path)
    }

    /// String value at a path, if present and a string.
    pub fn get_str(&self, path: &ConfigPath) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Keys of the object at a path (sorted), or empty if absent/not an object.
    pub fn keys_at(&self, path: &ConfigPath) -> Vec<String> {
        match value_at(&self.root, path) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Keys of the document root (sorted).
    pub fn root_keys(&self) -> Vec<String> {
        match &self.root {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Splice a value in at a path, creating intermediate objects as needed.
    /// Fails if an intermediate segment lands on a scalar or array.
    pub fn set(&mut self, path: &ConfigPath, value: Value) -> ConfigResult<()> {
        let mut current = &mut self.root;
        let (last, parents) = match path.segments().split_last() {
            Some(split) => split,
            None => return Err(ConfigError::InvalidPath(String::new())),
        };
        for (i, segment) in parents.iter().enumerate() {
            let map = current.as_object_mut().ok_or_else(|| ConfigError::NotAnObject {
                path: path.segments()[..i].join("."),
            })?;
            current = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let map = current.as_object_mut().ok_or_else(|| ConfigError::NotAnObject {
            path: parents.join("."),
        })?;
        map.insert(last.clone(), value);
        Ok(())
    }

    /// Remove the value at a path, returning it. Absent paths return `None`;
    /// parent objects are left in place even when emptied.
    pub fn remove(&mut self, path: &ConfigPath) -> Option<Value> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = &mut self.root;
        for segment in parents {
            current = current.as_object_mut()?.get_mut(segment)?;
        }
        current.as_object_mut()?.remove(last)
    }

    /// Whether a path resolves to any value.
    pub fn contains(&self, path: &ConfigPath) -> bool {
        self.get(path).is_some()
    }
}

/// Immutable path lookup on a raw value.
pub fn value_at<'a>(root: &'a Value, path: &ConfigPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> ConfigDocument {
        ConfigDocument::parse(
            r#"{
                "exampleApp": {
                    "image": "registry.example.com/example-app:1.2.0-SNAPSHOT-abcdef1",
                    "replicas": 1,
                    "configMap": {"data": {"GREETING": "hello"}}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_path_parse_and_display() {
        let path = ConfigPath::parse("exampleApp.configMap.data.GREETING").unwrap();
        assert_eq!(path.segments().len(), 4);
        assert_eq!(path.to_string(), "exampleApp.configMap.data.GREETING");
    }

    #[test]
    fn test_path_rejects_blank_segments() {
        assert!(ConfigPath::parse("").is_err());
        assert!(ConfigPath::parse("a..b").is_err());
        assert!(ConfigPath::parse(".a").is_err());
    }

    #[test]
    fn test_get_and_get_str() {
        let doc = doc();
        let path = ConfigPath::parse("exampleApp.image").unwrap();
        assert_eq!(
            doc.get_str(&path),
            Some("registry.example.com/example-app:1.2.0-SNAPSHOT-abcdef1")
        );
        assert_eq!(
            doc.get(&ConfigPath::parse("exampleApp.replicas").unwrap()),
            Some(&json!(1))
        );
        assert!(doc.get(&ConfigPath::parse("ghost.image").unwrap()).is_none());
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = ConfigDocument::empty();
        let path = ConfigPath::parse("exampleApp.configMap.data.MODE").unwrap();
        doc.set(&path, json!("fast")).unwrap();
        assert_eq!(doc.get_str(&path), Some("fast"));
    }

    #[test]
    fn test_set_refuses_to_descend_through_scalar() {
        let mut doc = doc();
        let path = ConfigPath::parse("exampleApp.replicas.nested").unwrap();
        let err = doc.set(&path, json!(true)).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnObject { .. }));
    }

    #[test]
    fn test_remove_leaves_empty_parent() {
        let mut doc = doc();
        let path = ConfigPath::parse("exampleApp.configMap.data.GREETING").unwrap();
        let removed = doc.remove(&path);
        assert_eq!(removed, Some(json!("hello")));
        // the data object stays, now empty
        assert_eq!(
            doc.get(&ConfigPath::parse("exampleApp.configMap.data").unwrap()),
            Some(&json!({}))
        );
        assert!(doc.remove(&path).is_none());
    }

    #[test]
    fn test_serialization_is_stable() {
        let doc = doc();
        let once = doc.to_pretty_string();
        let again = ConfigDocument::parse(&once).unwrap().to_pretty_string();
        assert_eq!(once, again);
        assert!(once.ends_with('\n'));
    }

    #[test]
    fn test_root_must_be_object() {
        assert!(matches!(
            ConfigDocument::parse("[1,2,3]"),
            Err(ConfigError::RootNotObject)
        ));
    }
}
