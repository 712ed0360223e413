//! Layered configuration model for environment branches
//!
//! Environment config trees are plain JSON documents layered in a fixed
//! precedence order (platform, then app, then environment). This crate owns
//! the structured read/edit API over those documents, the layer merge and
//! override attribution logic, and the schema evaluator boundary used to
//! validate a tree after every mutation.
//!
//! Nothing here talks to a review-request host; callers hand in file content
//! and working-tree roots and get documents and verdicts back.

mod error;
mod evaluator;
pub mod fakes;
mod layers;
mod staged;
mod tree;

pub use error::{ConfigError, ConfigResult};
pub use evaluator::{is_cue_available, ConfigEvaluator, CueEvaluator};
pub use layers::{deep_merge, ConfigLayer, LayeredConfig, OverrideRecord};
pub use staged::apply_validated_edit;
pub use tree::{value_at, ConfigDocument, ConfigPath};
