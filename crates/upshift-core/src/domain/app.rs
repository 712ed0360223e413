//! App registry.
//!
//! The app registry maps config identifiers (camelCase keys inside the JSON
//! config trees, e.g. `exampleApp`) to deployable names (kebab-case names
//! used for artifacts, images and sync apps, e.g. `example-app`). The
//! registry is read from the app-level config document; an explicit
//! `deployableName` field wins, otherwise the name is derived from the
//! identifier.

use std::collections::BTreeMap;

use upshift_config::{ConfigDocument, ConfigPath};

use crate::domain::error::{PromoteError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub identifier: String,
    pub deployable_name: String,
}

/// Lookup table between config identifiers and deployable names.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    entries: BTreeMap<String, AppEntry>,
}

impl AppRegistry {
    /// Build a registry from the app-level config document.
    pub fn from_document(doc: &ConfigDocument) -> Self {
        let mut entries = BTreeMap::new();
        for identifier in doc.root_keys() {
            let path = ConfigPath::from_segments(vec![
                identifier.clone(),
                "deployableName".to_string(),
            ]);
            let deployable_name = doc
                .get_str(&path)
                .map(str::to_string)
                .unwrap_or_else(|| derive_deployable_name(&identifier));
            entries.insert(
                identifier.clone(),
                AppEntry {
                    identifier,
                    deployable_name,
                },
            );
        }
        AppRegistry { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Config identifiers in sorted order.
    pub fn identifiers(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn deployable_name(&self, identifier: &str) -> Option<&str> {
        self.entries
            .get(identifier)
            .map(|e| e.deployable_name.as_str())
    }

    /// Deployable name even for identifiers the registry has never seen;
    /// unregistered apps fall back to the derived name.
    pub fn deployable_for(&self, identifier: &str) -> String {
        self.deployable_name(identifier)
            .map(str::to_string)
            .unwrap_or_else(|| derive_deployable_name(identifier))
    }

    /// Reverse lookup from deployable name to config identifier.
    pub fn identifier_for(&self, deployable_name: &str) -> Option<&str> {
        self.entries
            .values()
            .find(|e| e.deployable_name == deployable_name)
            .map(|e| e.identifier.as_str())
    }

    /// Look up an entry, failing with `UnknownApp` when absent.
    pub fn require(&self, identifier: &str) -> Result<&AppEntry> {
        self.entries
            .get(identifier)
            .ok_or_else(|| PromoteError::UnknownApp {
                app: identifier.to_string(),
            })
    }
}

/// `exampleApp` becomes `example-app`.
fn derive_deployable_name(identifier: &str) -> String {
    let mut out = String::with_capacity(identifier.len() + 4);
    for c in identifier.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(json: &str) -> AppRegistry {
        let doc = ConfigDocument::parse(json).unwrap();
        AppRegistry::from_document(&doc)
    }

    #[test]
    fn test_explicit_deployable_name_wins() {
        let reg = registry(r#"{"exampleApp": {"deployableName": "legacy-example"}}"#);
        assert_eq!(reg.deployable_name("exampleApp"), Some("legacy-example"));
        assert_eq!(reg.identifier_for("legacy-example"), Some("exampleApp"));
    }

    #[test]
    fn test_derived_name_from_camel_case() {
        let reg = registry(r#"{"exampleApp": {}, "paymentGatewayApi": {}}"#);
        assert_eq!(reg.deployable_name("exampleApp"), Some("example-app"));
        assert_eq!(
            reg.deployable_name("paymentGatewayApi"),
            Some("payment-gateway-api")
        );
        assert_eq!(reg.identifiers(), vec!["exampleApp", "paymentGatewayApi"]);
    }

    #[test]
    fn test_deployable_for_unregistered_identifier() {
        let reg = registry(r#"{"exampleApp": {"deployableName": "legacy-example"}}"#);
        assert_eq!(reg.deployable_for("exampleApp"), "legacy-example");
        assert_eq!(reg.deployable_for("adHocService"), "ad-hoc-service");
    }

    #[test]
    fn test_require_unknown_app() {
        let reg = registry(r#"{"exampleApp": {}}"#);
        assert!(reg.require("exampleApp").is_ok());
        match reg.require("ghostApp") {
            Err(PromoteError::UnknownApp { app }) => assert_eq!(app, "ghostApp"),
            other => panic!("expected UnknownApp, got {other:?}"),
        }
    }
}
