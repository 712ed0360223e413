//! Artifact and image promotion.
//!
//! Carrying a version from one environment to the next means the binary
//! artifact moves between repositories (snapshots to releases, or within
//! releases) and the container image gains the new tag. Both halves are
//! idempotent: anything already present in the destination is left alone,
//! so a re-run after a partial failure publishes nothing twice.

use std::sync::Arc;

use tracing::{debug, info, warn};
use upshift_gitops::{
    ArtifactRepository, GitopsError, ImageReference, ImageRegistry, RepositoryKind,
};

use crate::domain::{ArtifactVersion, Result};
use crate::retry::RetryPolicy;

/// What a promotion actually had to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutcome {
    /// The version now present in the destination repository.
    pub version: String,
    /// The image reference now present in the registry.
    pub image: ImageReference,
    /// False when the destination already held the artifact.
    pub artifact_published: bool,
    /// False when the registry already held the tag.
    pub image_pushed: bool,
}

impl ArtifactOutcome {
    pub fn summary(&self) -> String {
        let artifact = if self.artifact_published {
            "published"
        } else {
            "already present"
        };
        let image = if self.image_pushed {
            "pushed"
        } else {
            "already present"
        };
        format!("artifact {} ({artifact}), image {} ({image})", self.version, self.image)
    }
}

/// Moves artifacts between repositories and re-tags container images.
#[derive(Clone)]
pub struct ArtifactPromoter {
    snapshots: Arc<dyn ArtifactRepository>,
    releases: Arc<dyn ArtifactRepository>,
    images: Arc<dyn ImageRegistry>,
    retry: RetryPolicy,
}

impl ArtifactPromoter {
    pub fn new(
        snapshots: Arc<dyn ArtifactRepository>,
        releases: Arc<dyn ArtifactRepository>,
        images: Arc<dyn ImageRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        ArtifactPromoter {
            snapshots,
            releases,
            images,
            retry,
        }
    }

    fn repository(&self, kind: RepositoryKind) -> &dyn ArtifactRepository {
        match kind {
            RepositoryKind::Snapshots => self.snapshots.as_ref(),
            RepositoryKind::Releases => self.releases.as_ref(),
        }
    }

    /// Copy `current` to the destination repository under the `next` version
    /// and push the matching image tag.
    ///
    /// `old_image` is the image currently deployed for the app; the new
    /// reference keeps its registry and repository and swaps the tag.
    pub async fn promote(
        &self,
        name: &str,
        old_image: &ImageReference,
        current: &ArtifactVersion,
        next: &ArtifactVersion,
        source_kind: RepositoryKind,
        target_kind: RepositoryKind,
    ) -> Result<ArtifactOutcome> {
        let current_tag = current.to_string();
        let next_tag = next.to_string();

        let artifact_published = self
            .promote_artifact(name, &current_tag, &next_tag, source_kind, target_kind)
            .await?;

        let new_image = old_image.with_tag(&next_tag);
        let image_pushed = self.promote_image(old_image, &new_image).await?;

        info!(
            event = "artifact.promoted",
            name,
            version = %next_tag,
            artifact_published,
            image_pushed,
        );
        Ok(ArtifactOutcome {
            version: next_tag,
            image: new_image,
            artifact_published,
            image_pushed,
        })
    }

    async fn promote_artifact(
        &self,
        name: &str,
        current_tag: &str,
        next_tag: &str,
        source_kind: RepositoryKind,
        target_kind: RepositoryKind,
    ) -> Result<bool> {
        let source = self.repository(source_kind);
        let target = self.repository(target_kind);

        let present = self
            .retry
            .run("artifact exists check", || target.exists(name, next_tag))
            .await?;
        if present {
            debug!(event = "artifact.skip_publish", name, version = %next_tag);
            return Ok(false);
        }

        let data = self
            .retry
            .run("artifact download", || source.download(name, current_tag))
            .await?;
        match self
            .retry
            .run("artifact publish", || target.publish(name, next_tag, &data))
            .await
        {
            Ok(()) => Ok(true),
            // A concurrent flow won the race; the bits are identical.
            Err(GitopsError::AlreadyPublished { .. }) => {
                warn!(event = "artifact.publish_race", name, version = %next_tag);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn promote_image(
        &self,
        old_image: &ImageReference,
        new_image: &ImageReference,
    ) -> Result<bool> {
        let present = self
            .retry
            .run("image tag check", || self.images.tag_exists(new_image))
            .await?;
        if present {
            debug!(event = "image.skip_push", image = %new_image);
            return Ok(false);
        }

        self.retry
            .run("image pull", || self.images.pull(old_image))
            .await?;
        self.retry
            .run("image tag", || self.images.tag(old_image, new_image))
            .await?;
        self.retry
            .run("image push", || self.images.push(new_image))
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upshift_gitops::fakes::{MemoryArtifactRepository, MemoryImageRegistry};

    fn promoter() -> (
        ArtifactPromoter,
        Arc<MemoryArtifactRepository>,
        Arc<MemoryArtifactRepository>,
        Arc<MemoryImageRegistry>,
    ) {
        let snapshots = Arc::new(MemoryArtifactRepository::new(RepositoryKind::Snapshots));
        let releases = Arc::new(MemoryArtifactRepository::new(RepositoryKind::Releases));
        let images = Arc::new(MemoryImageRegistry::new());
        let promoter = ArtifactPromoter::new(
            snapshots.clone(),
            releases.clone(),
            images.clone(),
            RetryPolicy::default(),
        );
        (promoter, snapshots, releases, images)
    }

    fn image(tag: &str) -> ImageReference {
        ImageReference::parse(&format!("registry.example.dev/apps/example-app:{tag}")).unwrap()
    }

    #[tokio::test]
    async fn test_promotes_artifact_and_image() {
        let (promoter, snapshots, releases, images) = promoter();
        snapshots.seed("example-app", "1.2.0-SNAPSHOT-abcdef1");
        images.seed_remote(&image("1.2.0-SNAPSHOT-abcdef1"));

        let current = ArtifactVersion::parse("1.2.0-SNAPSHOT-abcdef1").unwrap();
        let next = ArtifactVersion::parse("1.2.0-rc1-abcdef1").unwrap();
        let outcome = promoter
            .promote(
                "example-app",
                &image("1.2.0-SNAPSHOT-abcdef1"),
                &current,
                &next,
                RepositoryKind::Snapshots,
                RepositoryKind::Releases,
            )
            .await
            .unwrap();

        assert!(outcome.artifact_published);
        assert!(outcome.image_pushed);
        assert_eq!(outcome.version, "1.2.0-rc1-abcdef1");
        assert!(releases
            .exists("example-app", "1.2.0-rc1-abcdef1")
            .await
            .unwrap());
        assert!(images.tag_exists(&image("1.2.0-rc1-abcdef1")).await.unwrap());
        // the snapshot stays where it was
        assert!(snapshots
            .exists("example-app", "1.2.0-SNAPSHOT-abcdef1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rerun_publishes_nothing() {
        let (promoter, snapshots, _releases, images) = promoter();
        snapshots.seed("example-app", "1.2.0-SNAPSHOT-abcdef1");
        images.seed_remote(&image("1.2.0-SNAPSHOT-abcdef1"));

        let current = ArtifactVersion::parse("1.2.0-SNAPSHOT-abcdef1").unwrap();
        let next = ArtifactVersion::parse("1.2.0-rc1-abcdef1").unwrap();
        let old_image = image("1.2.0-SNAPSHOT-abcdef1");
        let run = || {
            promoter.promote(
                "example-app",
                &old_image,
                &current,
                &next,
                RepositoryKind::Snapshots,
                RepositoryKind::Releases,
            )
        };
        run().await.unwrap();
        let ops_after_first = images.operations().len();

        let second = run().await.unwrap();
        assert!(!second.artifact_published);
        assert!(!second.image_pushed);
        // no further pull/tag/push happened
        assert_eq!(images.operations().len(), ops_after_first);
    }

    #[tokio::test]
    async fn test_missing_source_artifact_fails() {
        let (promoter, _snapshots, _releases, images) = promoter();
        images.seed_remote(&image("1.2.0-SNAPSHOT-abcdef1"));

        let current = ArtifactVersion::parse("1.2.0-SNAPSHOT-abcdef1").unwrap();
        let next = ArtifactVersion::parse("1.2.0-rc1-abcdef1").unwrap();
        let err = promoter
            .promote(
                "example-app",
                &image("1.2.0-SNAPSHOT-abcdef1"),
                &current,
                &next,
                RepositoryKind::Snapshots,
                RepositoryKind::Releases,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("artifact not found"), "got: {err}");
    }
}
