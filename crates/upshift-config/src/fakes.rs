//! In-memory evaluator fake (testing only)

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::evaluator::ConfigEvaluator;

/// Evaluator that serves scripted expression values and a scripted
/// validation verdict, ignoring the tree on disk.
#[derive(Debug, Default)]
pub struct StaticEvaluator {
    values: Mutex<HashMap<String, Value>>,
    validation_error: Mutex<Option<String>>,
}

impl StaticEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the value an expression evaluates to.
    pub fn set(&self, expr: &str, value: Value) {
        self.values
            .lock()
            .unwrap()
            .insert(expr.to_string(), value);
    }

    /// Make every subsequent `validate` call fail with this message.
    pub fn fail_validation(&self, details: &str) {
        *self.validation_error.lock().unwrap() = Some(details.to_string());
    }

    /// Clear a previously scripted validation failure.
    pub fn pass_validation(&self) {
        *self.validation_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl ConfigEvaluator for StaticEvaluator {
    async fn evaluate(&self, _root: &Path, expr: &str) -> ConfigResult<Value> {
        self.values
            .lock()
            .unwrap()
            .get(expr)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownExpression(expr.to_string()))
    }

    async fn validate(&self, _root: &Path) -> ConfigResult<()> {
        match self.validation_error.lock().unwrap().clone() {
            Some(details) => Err(ConfigError::Validation { details }),
            None => Ok(()),
        }
    }
}
