//! Upshift Core Library
//!
//! The promotion engine: version progression along the environment chain,
//! the promotion/rollback/skip/cleanup flows, structured config changes,
//! and the settings and observability plumbing they share. External systems
//! are reached only through the trait seams of `upshift-gitops` and
//! `upshift-config`, so every flow here runs unchanged against the
//! in-memory fakes.

pub mod config_ops;
pub mod domain;
pub mod flows;
pub mod obs;
pub mod orchestrator;
pub mod progression;
pub mod promoter;
pub mod retry;
pub mod settings;
pub mod telemetry;

pub use config_ops::{ChangeDelivery, ConfigChangeReport, ConfigEdit};

pub use domain::{
    AppEntry, AppRegistry, ArtifactVersion, CleanupReport, CommitHash, Environment,
    FlowDisposition, FlowStep, PromoteError, PromotionReport, PromotionRequest, Qualifier,
    Result, RollbackReport, SkipReport, SkipRequest, StepRecord, TriggerMode,
};

pub use orchestrator::PromotionEngine;

pub use progression::{next_version, Progression};

pub use promoter::{ArtifactOutcome, ArtifactPromoter};

pub use retry::{poll_until, PollOutcome, PollPolicy, RetryPolicy, Transient};

pub use settings::EngineSettings;

pub use telemetry::init_tracing;
