//! Config-language evaluator integration
//!
//! The promotion engine treats the configuration language as a black box
//! behind `ConfigEvaluator`: evaluate an expression within a tree, or
//! type-check the whole tree. The production backend shells out to the
//! `cue` CLI; tests use `StaticEvaluator` from the `fakes` module.

use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Black-box expression evaluation and schema validation over a config tree.
#[async_trait]
pub trait ConfigEvaluator: Send + Sync {
    /// Evaluate an expression path within the tree rooted at `root`,
    /// returning its JSON value.
    async fn evaluate(&self, root: &Path, expr: &str) -> ConfigResult<Value>;

    /// Type-check the whole tree against its schema.
    async fn validate(&self, root: &Path) -> ConfigResult<()>;
}

/// Check whether the `cue` CLI is on PATH.
pub fn is_cue_available() -> bool {
    Command::new("cue")
        .arg("version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Evaluator backed by the `cue` CLI (`cue export` / `cue vet`).
#[derive(Debug, Clone)]
pub struct CueEvaluator {
    binary: String,
}

impl Default for CueEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl CueEvaluator {
    pub fn new() -> Self {
        CueEvaluator {
            binary: "cue".to_string(),
        }
    }

    /// Use a non-PATH binary (tests, hermetic installs).
    pub fn with_binary(binary: &str) -> Self {
        CueEvaluator {
            binary: binary.to_string(),
        }
    }

    fn run(&self, root: &Path, args: &[&str]) -> ConfigResult<std::process::Output> {
        Command::new(&self.binary)
            .args(args)
            .current_dir(root)
            .output()
            .map_err(|e| ConfigError::EvaluatorMissing(format!("{}: {e}", self.binary)))
    }
}

#[async_trait]
impl ConfigEvaluator for CueEvaluator {
    async fn evaluate(&self, root: &Path, expr: &str) -> ConfigResult<Value> {
        let output = self.run(
            root,
            &["export", "./...", "--expression", expr, "--out", "json"],
        )?;
        if !output.status.success() {
            return Err(ConfigError::Evaluation {
                expr: expr.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let value: Value = serde_json::from_slice(&output.stdout)?;
        debug!(expr, "evaluated expression");
        Ok(value)
    }

    async fn validate(&self, root: &Path) -> ConfigResult<()> {
        let output = self.run(root, &["vet", "./..."])?;
        if !output.status.success() {
            return Err(ConfigError::Validation {
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_reports_evaluator_missing() {
        let evaluator = CueEvaluator::with_binary("definitely-not-a-real-binary");
        let dir = tempfile::tempdir().unwrap();
        let err = evaluator.validate(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::EvaluatorMissing(_)));
    }

    #[tokio::test]
    async fn test_cue_vet_round_trip() {
        // exercises the real CLI when present; environments without it skip
        if !is_cue_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.cue"), "a: 1\n").unwrap();
        CueEvaluator::new().validate(dir.path()).await.unwrap();

        let value = CueEvaluator::new()
            .evaluate(dir.path(), "a")
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(1));
    }
}
