//! Error types for the external collaborator interfaces.

use thiserror::Error;

/// Errors that can occur when talking to the review-request host, the sync
/// agent, an artifact repository, or an image registry.
#[derive(Error, Debug)]
pub enum GitopsError {
    /// Branch does not exist on the host
    #[error("branch not found: {branch}")]
    BranchNotFound { branch: String },

    /// Branch already exists (create collided)
    #[error("branch already exists: {branch}")]
    BranchExists { branch: String },

    /// File does not exist at the given ref
    #[error("file not found: {path} at {git_ref}")]
    FileNotFound { path: String, git_ref: String },

    /// Review request does not exist
    #[error("review request not found: !{id}")]
    ReviewRequestNotFound { id: u64 },

    /// Branch has no commit to revert
    #[error("nothing to revert on branch {branch}")]
    NothingToRevert { branch: String },

    /// Review request cannot be merged in its current state
    #[error("review request !{id} not mergeable: {reason}")]
    NotMergeable { id: u64, reason: String },

    /// Artifact version is absent from the repository
    #[error("artifact not found: {name} {version}")]
    ArtifactNotFound { name: String, version: String },

    /// Artifact version is already present in the repository
    #[error("artifact already published: {name} {version}")]
    AlreadyPublished { name: String, version: String },

    /// Image reference is absent from the registry
    #[error("image not found: {reference}")]
    ImageNotFound { reference: String },

    /// Container tooling failed (pull/tag/push)
    #[error("image operation failed: {0}")]
    Image(String),

    /// Required credentials are missing or empty
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The host rejected our credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network-level failure (connect, timeout, reset). Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server-side failure (HTTP 5xx). Retryable.
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Any other non-success response. Not retryable.
    #[error("unexpected response ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Local I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GitopsError {
    /// Whether a bounded retry is worthwhile.
    ///
    /// Transport failures and 5xx responses are transient; everything else is
    /// semantic and retrying would only repeat the same answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, GitopsError::Transport(_) | GitopsError::Server { .. })
    }
}

impl From<reqwest::Error> for GitopsError {
    fn from(err: reqwest::Error) -> Self {
        GitopsError::Transport(err.to_string())
    }
}

/// Result type for collaborator operations
pub type GitopsResult<T> = std::result::Result<T, GitopsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_transient() {
        assert!(GitopsError::Transport("connection reset".into()).is_transient());
        assert!(GitopsError::Server {
            status: 503,
            body: "unavailable".into()
        }
        .is_transient());
    }

    #[test]
    fn test_semantic_errors_are_not_transient() {
        assert!(!GitopsError::FileNotFound {
            path: "envs/apps.json".into(),
            git_ref: "stage".into()
        }
        .is_transient());
        assert!(!GitopsError::UnexpectedStatus {
            status: 404,
            body: "not found".into()
        }
        .is_transient());
        assert!(!GitopsError::Unauthorized("bad token".into()).is_transient());
    }
}
