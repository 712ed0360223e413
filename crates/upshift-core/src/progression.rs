//! Version progression rules.
//!
//! Given the version an environment currently carries, compute the version
//! the next environment should receive:
//!
//! - dev → stage turns a snapshot into the next release candidate for the
//!   same base version, numbered one past the highest candidate already
//!   published for that base.
//! - stage → prod drops the qualifier and produces the final release.
//!
//! Both rules are pure; the caller supplies the published version inventory
//! and the target's current version.

use upshift_gitops::RepositoryKind;

use crate::domain::{ArtifactVersion, Environment, PromoteError, Qualifier, Result};

/// The outcome of computing the next version for a promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progression {
    /// The promotion should proceed and produce `next`.
    Computed {
        next: ArtifactVersion,
        /// Repository the current artifact is read from.
        source_kind: RepositoryKind,
        /// Repository the next artifact is published to.
        target_kind: RepositoryKind,
    },
    /// The target already carries a version built from the same commit.
    /// Promoting again would republish identical bits; the flow short
    /// circuits to a no-op.
    AlreadyPromoted { existing: ArtifactVersion },
}

/// Compute the version the target environment should receive.
///
/// `target_current` is the version the target currently carries, when it
/// carries one. `published` is the inventory of the repository the next
/// version will be published to.
pub fn next_version(
    source: Environment,
    target: Environment,
    current: &ArtifactVersion,
    target_current: Option<&ArtifactVersion>,
    published: &[ArtifactVersion],
) -> Result<Progression> {
    match (source, target) {
        (Environment::Dev, Environment::Stage) => {
            dev_to_stage(current, target_current, published)
        }
        (Environment::Stage, Environment::Prod) => stage_to_prod(current, published),
        _ => Err(PromoteError::UnsupportedPromotionPath {
            source_env: source.to_string(),
            target: target.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// dev → stage
// ---------------------------------------------------------------------------

fn dev_to_stage(
    current: &ArtifactVersion,
    target_current: Option<&ArtifactVersion>,
    published: &[ArtifactVersion],
) -> Result<Progression> {
    let commit = current.commit.clone().ok_or_else(|| PromoteError::MalformedTag {
        tag: current.to_string(),
        reason: "a dev version must carry a commit hash".to_string(),
    })?;

    // Same commit already on the target means the candidate was built from
    // identical sources. Re-promoting is a no-op, not an error.
    if let Some(existing) = target_current {
        if existing.commit.as_ref() == Some(&commit) {
            return Ok(Progression::AlreadyPromoted {
                existing: existing.clone(),
            });
        }
    }

    let next_rc = 1 + published
        .iter()
        .filter(|v| v.base == current.base)
        .filter_map(ArtifactVersion::rc_number)
        .max()
        .unwrap_or(0);

    Ok(Progression::Computed {
        next: ArtifactVersion::candidate(current.base.clone(), next_rc, commit),
        source_kind: current.repository_kind(),
        target_kind: RepositoryKind::Releases,
    })
}

// ---------------------------------------------------------------------------
// stage → prod
// ---------------------------------------------------------------------------

fn stage_to_prod(current: &ArtifactVersion, published: &[ArtifactVersion]) -> Result<Progression> {
    let release_exists = published
        .iter()
        .any(|v| v.qualifier == Qualifier::Release && v.base == current.base);
    if release_exists {
        return Err(PromoteError::ReleaseAlreadyExists {
            version: current.base.clone(),
        });
    }

    Ok(Progression::Computed {
        next: ArtifactVersion::release(current.base.clone()),
        source_kind: current.repository_kind(),
        target_kind: RepositoryKind::Releases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(tag: &str) -> ArtifactVersion {
        ArtifactVersion::parse(tag).unwrap()
    }

    #[test]
    fn test_first_candidate_is_rc1() {
        let current = version("1.2.0-SNAPSHOT-abcdef1");
        let p = next_version(Environment::Dev, Environment::Stage, &current, None, &[]).unwrap();
        match p {
            Progression::Computed {
                next,
                source_kind,
                target_kind,
            } => {
                assert_eq!(next.to_string(), "1.2.0-rc1-abcdef1");
                assert_eq!(source_kind, RepositoryKind::Snapshots);
                assert_eq!(target_kind, RepositoryKind::Releases);
            }
            other => panic!("expected Computed, got {other:?}"),
        }
    }

    #[test]
    fn test_candidate_number_continues_past_highest() {
        let current = version("1.2.0-SNAPSHOT-1234abc");
        let published = vec![
            version("1.2.0-rc1-aaaaaaa"),
            version("1.2.0-rc2-bbbbbbb"),
            // A different base must not influence the numbering.
            version("1.1.0-rc9-ccccccc"),
            version("1.1.0"),
        ];
        let p = next_version(
            Environment::Dev,
            Environment::Stage,
            &current,
            None,
            &published,
        )
        .unwrap();
        match p {
            Progression::Computed { next, .. } => {
                assert_eq!(next.to_string(), "1.2.0-rc3-1234abc");
            }
            other => panic!("expected Computed, got {other:?}"),
        }
    }

    #[test]
    fn test_same_commit_on_target_short_circuits() {
        let current = version("1.2.0-SNAPSHOT-abcdef1");
        let existing = version("1.2.0-rc2-abcdef1");
        let p = next_version(
            Environment::Dev,
            Environment::Stage,
            &current,
            Some(&existing),
            &[version("1.2.0-rc1-1111111"), version("1.2.0-rc2-abcdef1")],
        )
        .unwrap();
        match p {
            Progression::AlreadyPromoted { existing } => {
                assert_eq!(existing.to_string(), "1.2.0-rc2-abcdef1");
            }
            other => panic!("expected AlreadyPromoted, got {other:?}"),
        }
    }

    #[test]
    fn test_different_commit_on_target_promotes() {
        let current = version("1.2.0-SNAPSHOT-abcdef1");
        let existing = version("1.2.0-rc1-9999999");
        let p = next_version(
            Environment::Dev,
            Environment::Stage,
            &current,
            Some(&existing),
            &[version("1.2.0-rc1-9999999")],
        )
        .unwrap();
        match p {
            Progression::Computed { next, .. } => {
                assert_eq!(next.to_string(), "1.2.0-rc2-abcdef1");
            }
            other => panic!("expected Computed, got {other:?}"),
        }
    }

    #[test]
    fn test_release_drops_qualifier() {
        let current = version("1.2.0-rc3-abcdef1");
        let p = next_version(Environment::Stage, Environment::Prod, &current, None, &[]).unwrap();
        match p {
            Progression::Computed {
                next,
                source_kind,
                target_kind,
            } => {
                assert_eq!(next.to_string(), "1.2.0");
                assert!(next.commit.is_none());
                assert_eq!(source_kind, RepositoryKind::Releases);
                assert_eq!(target_kind, RepositoryKind::Releases);
            }
            other => panic!("expected Computed, got {other:?}"),
        }
    }

    #[test]
    fn test_existing_release_is_a_hard_stop() {
        let current = version("1.2.0-rc3-abcdef1");
        let published = vec![version("1.2.0-rc3-abcdef1"), version("1.2.0")];
        let err = next_version(
            Environment::Stage,
            Environment::Prod,
            &current,
            None,
            &published,
        )
        .unwrap_err();
        match err {
            PromoteError::ReleaseAlreadyExists { version } => assert_eq!(version, "1.2.0"),
            other => panic!("expected ReleaseAlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_paths() {
        let current = version("1.2.0-SNAPSHOT-abcdef1");
        for (source, target) in [
            (Environment::Dev, Environment::Prod),
            (Environment::Stage, Environment::Dev),
            (Environment::Prod, Environment::Dev),
            (Environment::Prod, Environment::Stage),
            (Environment::Dev, Environment::Dev),
        ] {
            let err = next_version(source, target, &current, None, &[]).unwrap_err();
            assert!(
                matches!(err, PromoteError::UnsupportedPromotionPath { .. }),
                "{source} -> {target} should be unsupported"
            );
        }
    }

    #[test]
    fn test_dev_version_without_commit_is_rejected() {
        let current = ArtifactVersion::release("1.2.0");
        let err =
            next_version(Environment::Dev, Environment::Stage, &current, None, &[]).unwrap_err();
        assert!(matches!(err, PromoteError::MalformedTag { .. }));
    }
}
