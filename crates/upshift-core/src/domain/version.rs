//! Artifact version grammar.
//!
//! Tags come in three shapes:
//!
//! - `1.2.0-SNAPSHOT-abcdef1`: a dev build of base version 1.2.0
//! - `1.2.0-rc3-abcdef1`: the third release candidate for 1.2.0
//! - `1.2.0`: the released version, no qualifier and no commit
//!
//! Commit hashes are normalized to their first seven hex characters; a
//! qualifier always comes with a commit hash and a release never does.

use upshift_gitops::RepositoryKind;

use crate::domain::error::{PromoteError, Result};

/// A git commit hash normalized to seven lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitHash(String);

impl CommitHash {
    pub const LEN: usize = 7;

    /// Accepts any hash of at least seven hex characters and keeps the
    /// normalized prefix.
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.to_ascii_lowercase();
        if lowered.len() < Self::LEN || !lowered.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PromoteError::MalformedTag {
                tag: raw.to_string(),
                reason: "commit hash must be at least 7 hex characters".to_string(),
            });
        }
        Ok(CommitHash(lowered[..Self::LEN].to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a version sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Mutable dev build.
    Snapshot,
    /// Numbered release candidate.
    Candidate(u32),
    /// Final release.
    Release,
}

/// A parsed artifact version.
///
/// Invariant: `Snapshot` and `Candidate` versions carry a commit hash,
/// `Release` versions never do. The constructors and `parse` maintain this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactVersion {
    pub base: String,
    pub qualifier: Qualifier,
    pub commit: Option<CommitHash>,
}

impl ArtifactVersion {
    pub fn snapshot(base: impl Into<String>, commit: CommitHash) -> Self {
        ArtifactVersion {
            base: base.into(),
            qualifier: Qualifier::Snapshot,
            commit: Some(commit),
        }
    }

    pub fn candidate(base: impl Into<String>, number: u32, commit: CommitHash) -> Self {
        ArtifactVersion {
            base: base.into(),
            qualifier: Qualifier::Candidate(number),
            commit: Some(commit),
        }
    }

    pub fn release(base: impl Into<String>) -> Self {
        ArtifactVersion {
            base: base.into(),
            qualifier: Qualifier::Release,
            commit: None,
        }
    }

    /// Parse a tag in any of the three shapes.
    pub fn parse(tag: &str) -> Result<Self> {
        let malformed = |reason: &str| PromoteError::MalformedTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = tag.split('-').collect();
        match parts.as_slice() {
            [base] => {
                validate_base(base).map_err(|r| malformed(&r))?;
                Ok(ArtifactVersion::release(*base))
            }
            [base, qualifier, commit] => {
                validate_base(base).map_err(|r| malformed(&r))?;
                let commit = CommitHash::parse(commit)?;
                if *qualifier == "SNAPSHOT" {
                    Ok(ArtifactVersion::snapshot(*base, commit))
                } else if let Some(number) = qualifier.strip_prefix("rc") {
                    let number: u32 = number
                        .parse()
                        .map_err(|_| malformed("candidate number is not an integer"))?;
                    if number == 0 {
                        return Err(malformed("candidate numbering starts at 1"));
                    }
                    Ok(ArtifactVersion::candidate(*base, number, commit))
                } else {
                    Err(malformed("qualifier must be SNAPSHOT or rcN"))
                }
            }
            _ => Err(malformed("expected base, base-SNAPSHOT-hash or base-rcN-hash")),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.qualifier == Qualifier::Snapshot
    }

    pub fn is_release(&self) -> bool {
        self.qualifier == Qualifier::Release
    }

    /// The candidate number, for `rcN` versions.
    pub fn rc_number(&self) -> Option<u32> {
        match self.qualifier {
            Qualifier::Candidate(n) => Some(n),
            _ => None,
        }
    }

    /// Which artifact repository this version lives in. Snapshots are
    /// segregated; candidates and releases share the release repository.
    pub fn repository_kind(&self) -> RepositoryKind {
        match self.qualifier {
            Qualifier::Snapshot => RepositoryKind::Snapshots,
            Qualifier::Candidate(_) | Qualifier::Release => RepositoryKind::Releases,
        }
    }
}

impl std::fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.qualifier, &self.commit) {
            (Qualifier::Snapshot, Some(commit)) => {
                write!(f, "{}-SNAPSHOT-{}", self.base, commit)
            }
            (Qualifier::Candidate(n), Some(commit)) => {
                write!(f, "{}-rc{}-{}", self.base, n, commit)
            }
            _ => f.write_str(&self.base),
        }
    }
}

impl std::str::FromStr for ArtifactVersion {
    type Err = PromoteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_base(base: &str) -> std::result::Result<(), String> {
    if base.is_empty() {
        return Err("base version is empty".to_string());
    }
    let numeric = base
        .split('.')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if !numeric {
        return Err("base version must be dotted digits".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot() {
        let v = ArtifactVersion::parse("1.2.0-SNAPSHOT-abcdef1").unwrap();
        assert_eq!(v.base, "1.2.0");
        assert!(v.is_snapshot());
        assert_eq!(v.commit.as_ref().unwrap().as_str(), "abcdef1");
        assert_eq!(v.repository_kind(), RepositoryKind::Snapshots);
        assert_eq!(v.to_string(), "1.2.0-SNAPSHOT-abcdef1");
    }

    #[test]
    fn test_parse_candidate() {
        let v = ArtifactVersion::parse("1.2.0-rc3-ABCDEF1").unwrap();
        assert_eq!(v.rc_number(), Some(3));
        // hash is normalized to lowercase
        assert_eq!(v.to_string(), "1.2.0-rc3-abcdef1");
        assert_eq!(v.repository_kind(), RepositoryKind::Releases);
    }

    #[test]
    fn test_parse_release_has_no_commit() {
        let v = ArtifactVersion::parse("1.2.0").unwrap();
        assert!(v.is_release());
        assert!(v.commit.is_none());
        assert_eq!(v.to_string(), "1.2.0");
    }

    #[test]
    fn test_long_hash_is_truncated() {
        let v = ArtifactVersion::parse("1.2.0-SNAPSHOT-abcdef1234567890").unwrap();
        assert_eq!(v.commit.unwrap().as_str(), "abcdef1");
    }

    #[test]
    fn test_rejects_malformed_tags() {
        for tag in [
            "",
            "1.2.0-SNAPSHOT",
            "1.2.0-rc0-abcdef1",
            "1.2.0-rcX-abcdef1",
            "1.2.0-beta-abcdef1",
            "1.2.0-SNAPSHOT-xyz",
            "v1.2.0",
            "1..0",
        ] {
            assert!(
                ArtifactVersion::parse(tag).is_err(),
                "tag {tag:?} should not parse"
            );
        }
    }

    #[test]
    fn test_short_hash_rejected() {
        assert!(CommitHash::parse("abc12").is_err());
        assert!(CommitHash::parse("abcdef1").is_ok());
    }
}
