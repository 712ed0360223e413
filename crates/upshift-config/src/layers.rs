//! Three-layer configuration unification
//!
//! Config values come from three stacked layers with fixed precedence:
//! platform defaults, per-application defaults, and environment overrides.
//! The environment layer always wins, then the app layer, then the platform.
//! `LayeredConfig` computes the effective tree and reports which layer owns
//! the effective value at any path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::{value_at, ConfigPath};

/// The stacked configuration layers, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLayer {
    Platform,
    App,
    Environment,
}

impl std::fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLayer::Platform => write!(f, "platform"),
            ConfigLayer::App => write!(f, "app"),
            ConfigLayer::Environment => write!(f, "environment"),
        }
    }
}

/// Provenance of one effective config value. Derived from evaluation of the
/// layers, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRecord {
    pub path: ConfigPath,
    pub layer: ConfigLayer,
    pub value: Value,
}

/// One application's configuration split by layer.
///
/// Each layer holds a partial tree (JSON object); absent layers are empty
/// objects. Unification merges objects key-by-key and lets the higher layer
/// replace scalars and arrays wholesale (arrays are never merged
/// element-wise).
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    platform: Value,
    app: Value,
    environment: Value,
}

impl LayeredConfig {
    pub fn new(platform: Value, app: Value, environment: Value) -> Self {
        LayeredConfig {
            platform,
            app,
            environment,
        }
    }

    fn layer(&self, layer: ConfigLayer) -> &Value {
        match layer {
            ConfigLayer::Platform => &self.platform,
            ConfigLayer::App => &self.app,
            ConfigLayer::Environment => &self.environment,
        }
    }

    /// The effective configuration after unifying all three layers.
    pub fn effective(&self) -> Value {
        let mut merged = self.platform.clone();
        deep_merge(&mut merged, &self.app);
        deep_merge(&mut merged, &self.environment);
        merged
    }

    /// Which layer supplies the effective value at a path, if any.
    ///
    /// Highest precedence wins: a path defined in both the app and the
    /// environment layer is owned by the environment.
    pub fn owner_of(&self, path: &ConfigPath) -> Option<ConfigLayer> {
        for layer in [ConfigLayer::Environment, ConfigLayer::App, ConfigLayer::Platform] {
            if value_at(self.layer(layer), path).is_some() {
                return Some(layer);
            }
        }
        None
    }

    /// Every leaf of the effective tree attributed to its owning layer,
    /// sorted by path.
    pub fn records(&self) -> Vec<OverrideRecord> {
        let effective = self.effective();
        let mut leaves = Vec::new();
        collect_leaves(&effective, &mut Vec::new(), &mut leaves);
        let mut records: Vec<OverrideRecord> = leaves
            .into_iter()
            .filter_map(|(segments, value)| {
                let path = ConfigPath::from_segments(segments);
                let layer = self.owner_of(&path)?;
                Some(OverrideRecord { path, layer, value })
            })
            .collect();
        records.sort_by(|a, b| a.path.to_string().cmp(&b.path.to_string()));
        records
    }
}

/// Merge `overlay` into `base`: objects recurse, everything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn collect_leaves(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<(Vec<String>, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                prefix.push(key.clone());
                collect_leaves(child, prefix, out);
                prefix.pop();
            }
        }
        other => {
            if !prefix.is_empty() {
                out.push((prefix.clone(), other.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layered() -> LayeredConfig {
        LayeredConfig::new(
            json!({"replicas": 1, "resources": {"limits": {"memory": "256Mi"}}, "debug": false}),
            json!({"image": "registry.example.com/example-app:0.0.0", "replicas": 2}),
            json!({"replicas": 5, "debug": true}),
        )
    }

    #[test]
    fn test_environment_wins_over_app_over_platform() {
        let effective = layered().effective();
        // environment beats both lower layers
        assert_eq!(effective["replicas"], json!(5));
        assert_eq!(effective["debug"], json!(true));
        // app fills in what the environment leaves alone
        assert_eq!(
            effective["image"],
            json!("registry.example.com/example-app:0.0.0")
        );
        // platform survives where nothing overrides it
        assert_eq!(effective["resources"]["limits"]["memory"], json!("256Mi"));
    }

    #[test]
    fn test_owner_attribution() {
        let layered = layered();
        let owner = |p: &str| layered.owner_of(&ConfigPath::parse(p).unwrap());
        assert_eq!(owner("replicas"), Some(ConfigLayer::Environment));
        assert_eq!(owner("image"), Some(ConfigLayer::App));
        assert_eq!(owner("resources.limits.memory"), Some(ConfigLayer::Platform));
        assert_eq!(owner("ghost"), None);
    }

    #[test]
    fn test_records_sorted_with_owners() {
        let records = layered().records();
        let paths: Vec<String> = records.iter().map(|r| r.path.to_string()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        let replicas = records
            .iter()
            .find(|r| r.path.to_string() == "replicas")
            .unwrap();
        assert_eq!(replicas.layer, ConfigLayer::Environment);
        assert_eq!(replicas.value, json!(5));
    }

    #[test]
    fn test_arrays_replace_wholesale() {
        let layered = LayeredConfig::new(
            json!({"args": ["-Xmx256m"]}),
            json!({}),
            json!({"args": ["-Xmx512m", "-verbose"]}),
        );
        assert_eq!(layered.effective()["args"], json!(["-Xmx512m", "-verbose"]));
    }

    #[test]
    fn test_deep_merge_adds_new_keys() {
        let mut base = json!({"a": {"b": 1}});
        deep_merge(&mut base, &json!({"a": {"c": 2}, "d": 3}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 2}, "d": 3}));
    }
}
