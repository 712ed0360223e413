//! Error types for the configuration layer.

use thiserror::Error;

/// Errors from parsing, editing, or evaluating configuration trees.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Document is not parseable JSON
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Document top level must be an object
    #[error("config root is not an object")]
    RootNotObject,

    /// Path string could not be parsed
    #[error("invalid config path: {0}")]
    InvalidPath(String),

    /// An edit tried to descend through a scalar or array
    #[error("path {path} passes through a non-object value")]
    NotAnObject { path: String },

    /// Fake evaluator has no value scripted for the expression
    #[error("unknown expression: {0}")]
    UnknownExpression(String),

    /// Evaluator binary is not on PATH
    #[error("config evaluator not available: {0}")]
    EvaluatorMissing(String),

    /// The evaluator rejected an expression
    #[error("evaluation failed for {expr}: {stderr}")]
    Evaluation { expr: String, stderr: String },

    /// The tree no longer type-checks against its schema
    #[error("schema validation failed: {details}")]
    Validation { details: String },

    /// Filesystem error while staging edits
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
