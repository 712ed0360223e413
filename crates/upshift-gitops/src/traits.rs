//! Collaborator trait definitions for Upshift
//!
//! These traits define the narrow interfaces to every external system the
//! promotion engine touches:
//! - `ReviewRequestHost`: config branches, files, review requests
//! - `SyncAgent`: cluster sync/health status per application
//! - `ArtifactRepository`: versioned binary storage (one instance per kind)
//! - `ImageRegistry`: container image pull/tag/push
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GitopsError, GitopsResult};

// ---------------------------------------------------------------------------
// ReviewRequestHost — config branches and review requests
// ---------------------------------------------------------------------------

/// A commit on a configuration branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit sha as reported by the host
    pub sha: String,
    /// First line plus body of the commit message
    pub message: String,
    /// Author timestamp
    pub authored_at: DateTime<Utc>,
}

/// Host-assigned identifier of a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewRequestId(pub u64);

impl std::fmt::Display for ReviewRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{}", self.0)
    }
}

/// Lifecycle state of a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRequestState {
    Open,
    Merged,
    Closed,
}

/// CI verdict attached to a review request by the host.
///
/// Backends map their pipeline vocabulary onto these four values; a pipeline
/// the host reports as skipped counts as `Passed` (nothing left to validate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

/// Payload for opening a review request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReviewRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
}

/// A review request as seen by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: ReviewRequestId,
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub state: ReviewRequestState,
    pub ci: CiStatus,
    /// True when the host cannot merge without manual reconciliation
    pub has_conflicts: bool,
    /// Link for humans; absent on fakes
    pub web_url: Option<String>,
}

/// Review-request host (config repository service).
///
/// Guarantees:
/// - `create_branch` fails with `BranchExists` on collision, never overwrites.
/// - `get_file`/`update_file` operate on exactly one path per call; commits
///   created by `update_file` carry the given message verbatim.
/// - `revert_last_commit` produces a new commit that restores the file state
///   of the commit before HEAD, with the caller's message (the caller embeds
///   any trigger-suppression marker itself).
/// - `close_review_request` posts the annotation note, when given, before
///   closing; closing an already-closed request is a no-op.
#[async_trait]
pub trait ReviewRequestHost: Send + Sync {
    /// Create a branch pointing at `from_ref`.
    async fn create_branch(&self, name: &str, from_ref: &str) -> GitopsResult<()>;

    /// Delete a branch. No-op if absent (cleanup is best-effort).
    async fn delete_branch(&self, name: &str) -> GitopsResult<()>;

    /// Read a file's content at a ref (branch name or commit sha).
    async fn get_file(&self, path: &str, git_ref: &str) -> GitopsResult<String>;

    /// Create or replace a file on a branch with a commit.
    async fn update_file(
        &self,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> GitopsResult<()>;

    /// HEAD commit of a branch.
    async fn last_commit(&self, branch: &str) -> GitopsResult<CommitInfo>;

    /// Revert the HEAD commit of a branch with a caller-controlled message.
    async fn revert_last_commit(&self, branch: &str, message: &str) -> GitopsResult<CommitInfo>;

    /// Open a review request.
    async fn create_review_request(&self, req: NewReviewRequest) -> GitopsResult<ReviewRequest>;

    /// Fetch the current view of a review request (state, CI, conflicts).
    async fn get_review_request(&self, id: ReviewRequestId) -> GitopsResult<ReviewRequest>;

    /// Merge an open review request into its target branch.
    async fn merge_review_request(&self, id: ReviewRequestId) -> GitopsResult<()>;

    /// Annotate (optionally) and close an open review request.
    async fn close_review_request(
        &self,
        id: ReviewRequestId,
        note: Option<&str>,
    ) -> GitopsResult<()>;

    /// All open review requests targeting a branch.
    async fn list_open_review_requests(
        &self,
        target_branch: &str,
    ) -> GitopsResult<Vec<ReviewRequest>>;

    /// Paths changed both by the request and on its target since the request
    /// was opened. Empty when the host reports no conflicts.
    async fn conflicting_paths(&self, id: ReviewRequestId) -> GitopsResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// SyncAgent — cluster sync and health status
// ---------------------------------------------------------------------------

/// Whether the cluster matches the configuration branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SyncState {
    Synced,
    OutOfSync,
    Unknown,
}

/// Application health as reported by the sync agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HealthState {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    Unknown,
}

/// Snapshot of one application's deployment status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSyncStatus {
    /// Commit sha of the config revision the agent last applied
    pub revision: String,
    pub sync: SyncState,
    pub health: HealthState,
}

/// Read-only view of the external sync agent.
///
/// The engine never instructs the agent; it only observes. Completion of a
/// promotion requires `Synced` AND `Healthy` at a revision newer than the one
/// recorded before the merge.
#[async_trait]
pub trait SyncAgent: Send + Sync {
    /// Config revision the agent last applied for the app.
    async fn revision(&self, app: &str) -> GitopsResult<String>;

    /// Full sync/health snapshot for the app.
    async fn status(&self, app: &str) -> GitopsResult<AppSyncStatus>;
}

// ---------------------------------------------------------------------------
// ArtifactRepository — versioned binary storage
// ---------------------------------------------------------------------------

/// Which repository an artifact version lives in.
///
/// Snapshot builds and release candidates/releases are segregated; the
/// promoter is constructed with one `ArtifactRepository` instance per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    Snapshots,
    Releases,
}

impl std::fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryKind::Snapshots => write!(f, "snapshots"),
            RepositoryKind::Releases => write!(f, "releases"),
        }
    }
}

/// Versioned artifact store.
///
/// Guarantees:
/// - `publish` of an existing version fails with `AlreadyPublished`, never
///   silently overwrites.
/// - `versions` returns every stored version string for the artifact name,
///   unordered.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Which kind of versions this instance stores.
    fn kind(&self) -> RepositoryKind;

    /// Fetch the artifact bytes. `ArtifactNotFound` if absent.
    async fn download(&self, name: &str, version: &str) -> GitopsResult<Vec<u8>>;

    /// Store artifact bytes under a new version.
    async fn publish(&self, name: &str, version: &str, data: &[u8]) -> GitopsResult<()>;

    /// Whether the version is already present.
    async fn exists(&self, name: &str, version: &str) -> GitopsResult<bool>;

    /// All known version strings for the artifact.
    async fn versions(&self, name: &str) -> GitopsResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// ImageRegistry — container images
// ---------------------------------------------------------------------------

/// A fully qualified container image reference (`registry/repository:tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse `registry.example.com/group/app:tag`.
    ///
    /// The first path segment is the registry host; the tag is everything
    /// after the last `:` that follows the last `/`.
    pub fn parse(reference: &str) -> GitopsResult<Self> {
        let (path, tag) = match reference.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') && !tag.is_empty() => (path, tag),
            _ => {
                return Err(GitopsError::Image(format!(
                    "image reference has no tag: {reference}"
                )))
            }
        };
        let (registry, repository) = path.split_once('/').ok_or_else(|| {
            GitopsError::Image(format!("image reference has no registry host: {reference}"))
        })?;
        if repository.is_empty() {
            return Err(GitopsError::Image(format!(
                "image reference has no repository: {reference}"
            )));
        }
        Ok(ImageReference {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Same image, different tag.
    pub fn with_tag(&self, tag: &str) -> Self {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: tag.to_string(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// Container image registry client.
///
/// Guarantees:
/// - `tag` requires the source to have been pulled (or tagged) locally first.
/// - `push` of a tag that already exists remotely is a no-op upload of
///   identical content, never corruption.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Pull an image so it can be re-tagged.
    async fn pull(&self, reference: &ImageReference) -> GitopsResult<()>;

    /// Apply a new tag to a locally available image.
    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> GitopsResult<()>;

    /// Push a locally tagged image to its registry.
    async fn push(&self, reference: &ImageReference) -> GitopsResult<()>;

    /// Whether the tag is already present remotely.
    async fn tag_exists(&self, reference: &ImageReference) -> GitopsResult<bool>;
}
