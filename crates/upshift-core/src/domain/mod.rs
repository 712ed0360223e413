//! Domain models for the promotion engine.
//!
//! Canonical definitions for the core entities:
//! - `Environment`: The ordered promotion chain
//! - `ArtifactVersion`: The snapshot / candidate / release tag grammar
//! - `AppRegistry`: Config identifiers and their deployable names
//! - `PromotionRequest` / reports: What flows take in and hand back

pub mod app;
pub mod environment;
pub mod error;
pub mod request;
pub mod version;

// Re-export main types and errors
pub use app::{AppEntry, AppRegistry};
pub use environment::Environment;
pub use error::{PromoteError, Result};
pub use request::{
    CleanupReport, FlowDisposition, FlowStep, PromotionReport, PromotionRequest, RollbackReport,
    SkipReport, SkipRequest, StepRecord, TriggerMode,
};
pub use version::{ArtifactVersion, CommitHash, Qualifier};
