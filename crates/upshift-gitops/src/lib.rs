//! Upshift-Gitops: External Collaborator Interfaces
//!
//! Narrow, async trait seams for everything the promotion engine talks to
//! outside its own process:
//!
//! - `ReviewRequestHost`: the config repository service (branches, files,
//!   review requests, CI verdicts)
//! - `SyncAgent`: the cluster reconciler's sync/health view
//! - `ArtifactRepository`: versioned binary storage, one instance per kind
//! - `ImageRegistry`: container image pull/tag/push
//!
//! Production backends live beside the traits (`GitLabHost`, `ArgoSyncAgent`,
//! `PackageRepository`, `DockerCliRegistry`); in-memory fakes for tests live
//! in `fakes`.

mod argo;
mod docker;
mod error;
pub mod fakes;
mod gitlab;
mod packages;
pub mod traits;

pub use argo::{ArgoConfig, ArgoSyncAgent};
pub use docker::{is_docker_available, DockerCliRegistry};
pub use error::{GitopsError, GitopsResult};
pub use gitlab::{GitLabConfig, GitLabHost};
pub use packages::{PackageRegistryConfig, PackageRepository};
pub use traits::{
    AppSyncStatus, ArtifactRepository, CiStatus, CommitInfo, HealthState, ImageReference,
    ImageRegistry, NewReviewRequest, RepositoryKind, ReviewRequest, ReviewRequestHost,
    ReviewRequestId, ReviewRequestState, SyncAgent, SyncState,
};
