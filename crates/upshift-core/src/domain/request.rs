//! Promotion requests, flow steps and the reports each flow produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upshift_gitops::ReviewRequestId;
use upshift_merge::{AppSelection, MergeOutcome};
use uuid::Uuid;

use crate::domain::environment::Environment;

// ---------------------------------------------------------------------------
// Flow steps
// ---------------------------------------------------------------------------

/// The checkpoints of a promotion flow, in execution order. A failed flow
/// reports the step it died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Start,
    BranchCreated,
    ArtifactPromoted,
    ConfigMerged,
    ManifestsRegenerated,
    ReviewRequestOpened,
    CiValidated,
    Merged,
    SyncConfirmed,
    Done,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::Start => "start",
            FlowStep::BranchCreated => "branch_created",
            FlowStep::ArtifactPromoted => "artifact_promoted",
            FlowStep::ConfigMerged => "config_merged",
            FlowStep::ManifestsRegenerated => "manifests_regenerated",
            FlowStep::ReviewRequestOpened => "review_request_opened",
            FlowStep::CiValidated => "ci_validated",
            FlowStep::Merged => "merged",
            FlowStep::SyncConfirmed => "sync_confirmed",
            FlowStep::Done => "done",
        }
    }
}

impl std::fmt::Display for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed checkpoint with its timestamp and a human-readable detail.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: FlowStep,
    pub completed_at: DateTime<Utc>,
    pub detail: String,
}

impl StepRecord {
    pub fn now(step: FlowStep, detail: impl Into<String>) -> Self {
        StepRecord {
            step,
            completed_at: Utc::now(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// How a promotion was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Triggered by a change landing on the source environment branch. The
    /// tag to promote is read from the source environment config.
    Auto,
    /// Triggered by an operator, optionally naming an explicit tag.
    Manual,
    /// Sub-flow of a skip-environment request; config-only, no artifact
    /// movement and no version progression.
    Skip,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Auto => "auto",
            TriggerMode::Manual => "manual",
            TriggerMode::Skip => "skip",
        }
    }
}

/// A request to promote from one environment to the next.
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    pub id: Uuid,
    pub source: Environment,
    pub target: Environment,
    /// Explicit tag to promote. `None` means read it from the source
    /// environment config.
    pub image_tag: Option<String>,
    pub apps: AppSelection,
    pub mode: TriggerMode,
    /// Skip publishing artifacts and pushing images; only the config moves.
    pub skip_artifact_promotion: bool,
    pub description: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl PromotionRequest {
    pub fn new(source: Environment, target: Environment) -> Self {
        PromotionRequest {
            id: Uuid::new_v4(),
            source,
            target,
            image_tag: None,
            apps: AppSelection::All,
            mode: TriggerMode::Manual,
            skip_artifact_promotion: false,
            description: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    pub fn with_apps(mut self, apps: AppSelection) -> Self {
        self.apps = apps;
        self
    }

    pub fn auto(mut self) -> Self {
        self.mode = TriggerMode::Auto;
        self
    }

    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn skipping_artifact_promotion(mut self) -> Self {
        self.skip_artifact_promotion = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A request to carry one app's version across several environments at once,
/// bypassing the environments in between.
#[derive(Debug, Clone)]
pub struct SkipRequest {
    pub id: Uuid,
    pub first: Environment,
    pub second: Environment,
    pub app: String,
    /// Explicit tag to carry. `None` means read the app's current tag from
    /// the first environment.
    pub image_tag: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl SkipRequest {
    pub fn new(first: Environment, second: Environment, app: impl Into<String>) -> Self {
        SkipRequest {
            id: Uuid::new_v4(),
            first,
            second,
            app: app.into(),
            image_tag: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How a promotion flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDisposition {
    /// The full flow ran and the target environment now carries the tag.
    Completed,
    /// The target already carries a version built from the same commit;
    /// nothing was published or changed.
    AlreadyPromoted,
    /// An auto-trigger was suppressed because the source branch head is a
    /// rollback commit.
    SuppressedByRollback,
    /// The merge produced no changes, so no review request was opened.
    NoChanges,
}

impl FlowDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDisposition::Completed => "completed",
            FlowDisposition::AlreadyPromoted => "already_promoted",
            FlowDisposition::SuppressedByRollback => "suppressed_by_rollback",
            FlowDisposition::NoChanges => "no_changes",
        }
    }
}

/// The audit record of one promotion flow.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub request_id: Uuid,
    pub source: Environment,
    pub target: Environment,
    /// The tag the target now carries (or already carried). Absent only
    /// when the flow was suppressed before a tag was resolved.
    pub tag: Option<String>,
    pub disposition: FlowDisposition,
    pub work_branch: Option<String>,
    pub review_request: Option<ReviewRequestId>,
    pub merge: Option<MergeOutcome>,
    pub steps: Vec<StepRecord>,
    /// Older promotion review requests closed as superseded.
    pub superseded_closed: Vec<ReviewRequestId>,
    pub completed_at: DateTime<Utc>,
}

impl PromotionReport {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.disposition,
            FlowDisposition::Completed | FlowDisposition::AlreadyPromoted
        )
    }
}

/// The audit record of a rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub environment: Environment,
    /// First line of the commit that was reverted.
    pub reverted_commit: String,
    /// Sha of the revert commit now at the branch head.
    pub revert_sha: String,
    pub reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// The audit record of a cleanup sweep over stale promotion review requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub closed: Vec<ReviewRequestId>,
    pub deleted_branches: Vec<String>,
    /// Review requests or branches that could not be cleaned up. Cleanup
    /// never fails outright; failures are counted and reported.
    pub failures: usize,
}

/// The audit record of a skip-environment flow: one report per target
/// environment, in chain order.
#[derive(Debug, Clone, Serialize)]
pub struct SkipReport {
    pub request_id: Uuid,
    pub app: String,
    pub tag: String,
    pub reports: Vec<PromotionReport>,
    pub completed_at: DateTime<Utc>,
}
