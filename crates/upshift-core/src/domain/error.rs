//! Error taxonomy for the promotion engine.

use upshift_config::ConfigError;
use upshift_gitops::{GitopsError, ReviewRequestId};
use upshift_merge::MergeError;

use crate::domain::environment::Environment;
use crate::domain::request::FlowStep;

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("malformed tag '{tag}': {reason}")]
    MalformedTag { tag: String, reason: String },

    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("no promotion path from {source_env} to {target}")]
    UnsupportedPromotionPath { source_env: String, target: String },

    #[error("release {version} already exists; promote a new candidate instead")]
    ReleaseAlreadyExists { version: String },

    #[error("app '{app}' is not declared in the app registry")]
    UnknownApp { app: String },

    #[error("app selection is empty")]
    EmptySelection,

    #[error("cannot skip from {first} to {second}: environments must be at least two apart in chain order")]
    SkipNotApplicable {
        first: Environment,
        second: Environment,
    },

    #[error("field '{field}' cannot be edited; only replicas and debug are editable")]
    FieldNotEditable { field: String },

    #[error("invalid value for {field}: expected {expected}")]
    FieldValue {
        field: String,
        expected: &'static str,
    },

    #[error("CI failed for review request {id}")]
    CiFailed { id: ReviewRequestId },

    #[error("sync reported an unhealthy state: {details}")]
    SyncUnhealthy { details: String },

    #[error("timed out waiting for {operation} (last status: {last_status})")]
    Timeout {
        operation: String,
        last_status: String,
    },

    #[error("manifest evaluation produced {got}, expected an object of named manifests")]
    ManifestShape { got: String },

    #[error("promotion failed during {step}: {source}")]
    Step {
        step: FlowStep,
        #[source]
        source: Box<PromoteError>,
    },

    #[error(transparent)]
    Gitops(#[from] GitopsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromoteError {
    /// Wrap an error with the flow step it occurred in.
    pub fn at_step(step: FlowStep, source: PromoteError) -> Self {
        PromoteError::Step {
            step,
            source: Box::new(source),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PromoteError::Gitops(e) => e.is_transient(),
            PromoteError::Step { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PromoteError>;
