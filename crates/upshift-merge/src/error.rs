//! Error types for the promotion merge engine

use thiserror::Error;
use upshift_config::ConfigError;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("app '{app}' has no image reference in the source environment")]
    MissingImage { app: String },

    #[error("unresolved conflict paths: {}", .paths.join(", "))]
    UnresolvedConflicts { paths: Vec<String> },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type MergeResult<T> = Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_message_lists_every_path() {
        let err = MergeError::UnresolvedConflicts {
            paths: vec!["README.md".to_string(), "scripts/deploy.sh".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unresolved conflict paths: README.md, scripts/deploy.sh"
        );
    }
}
