//! Conflict resolution for promotion work branches
//!
//! When a work branch races against a moving environment branch, the host
//! reports the conflicting paths and this module decides, per path, which
//! side survives. Decisions come from a fixed strategy table and nothing
//! else, so identical conflict sets with identical context always resolve
//! identically. The full set is decided before anything is applied; a single
//! path without a strategy fails the whole resolution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::layout::{ENVIRONMENT_CONFIG_PATH, MANIFEST_DIR, MARKER_DIR};

/// Which side of a conflicted path survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Keep the work branch's version.
    Ours,
    /// Take the environment branch's version.
    Theirs,
}

/// The strategy-table entry that decided a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
    /// Rendered manifests are regenerated after the merge; local wins.
    GeneratedManifest,
    /// Branch-local promotion markers mean nothing on other branches.
    BranchMarker,
    /// The environment config file; direction depends on context.
    EnvironmentConfig,
}

/// Everything the strategy table is allowed to consult besides the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictContext {
    /// True while the work branch carries an in-flight promotion. The
    /// environment config then keeps our version; outside a promotion the
    /// incoming environment version wins.
    pub during_promotion: bool,
}

/// A decided path, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResolution {
    pub path: String,
    pub side: Side,
    pub rule: ConflictRule,
}

/// Decide one path, or `None` when no strategy covers it.
pub fn classify(path: &str, ctx: ConflictContext) -> Option<PathResolution> {
    let (side, rule) = if path.starts_with(MANIFEST_DIR) {
        (Side::Ours, ConflictRule::GeneratedManifest)
    } else if path.starts_with(MARKER_DIR) {
        (Side::Ours, ConflictRule::BranchMarker)
    } else if path == ENVIRONMENT_CONFIG_PATH {
        let side = if ctx.during_promotion {
            Side::Ours
        } else {
            Side::Theirs
        };
        (side, ConflictRule::EnvironmentConfig)
    } else {
        return None;
    };
    Some(PathResolution {
        path: path.to_string(),
        side,
        rule,
    })
}

/// Decide every conflicted path up front.
///
/// Returns the resolutions sorted by path, or fails with the complete list of
/// paths no strategy covers. Nothing is partially resolved: callers apply the
/// returned set only when this function succeeds.
pub fn resolve_all(paths: &[String], ctx: ConflictContext) -> MergeResult<Vec<PathResolution>> {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut resolutions = Vec::with_capacity(sorted.len());
    let mut unresolved = Vec::new();
    for path in sorted {
        match classify(path, ctx) {
            Some(resolution) => {
                debug!(
                    path = %resolution.path,
                    side = ?resolution.side,
                    rule = ?resolution.rule,
                    "conflict path decided"
                );
                resolutions.push(resolution);
            }
            None => unresolved.push(path.to_string()),
        }
    }

    if !unresolved.is_empty() {
        return Err(MergeError::UnresolvedConflicts { paths: unresolved });
    }
    Ok(resolutions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(during_promotion: bool) -> ConflictContext {
        ConflictContext { during_promotion }
    }

    #[test]
    fn test_generated_manifests_keep_ours() {
        let r = classify("manifests/example-app.yaml", ctx(false)).unwrap();
        assert_eq!(r.side, Side::Ours);
        assert_eq!(r.rule, ConflictRule::GeneratedManifest);
    }

    #[test]
    fn test_branch_markers_keep_ours() {
        let r = classify(".upshift/promotion.json", ctx(true)).unwrap();
        assert_eq!(r.side, Side::Ours);
        assert_eq!(r.rule, ConflictRule::BranchMarker);
    }

    #[test]
    fn test_environment_config_direction_follows_context() {
        let during = classify("config/environment.json", ctx(true)).unwrap();
        assert_eq!(during.side, Side::Ours);
        let outside = classify("config/environment.json", ctx(false)).unwrap();
        assert_eq!(outside.side, Side::Theirs);
        assert_eq!(outside.rule, ConflictRule::EnvironmentConfig);
    }

    #[test]
    fn test_unknown_path_fails_closed_with_full_list() {
        let paths = vec![
            "scripts/deploy.sh".to_string(),
            "manifests/a.yaml".to_string(),
            "README.md".to_string(),
        ];
        let err = resolve_all(&paths, ctx(true)).unwrap_err();
        match err {
            MergeError::UnresolvedConflicts { paths } => {
                assert_eq!(paths, vec!["README.md", "scripts/deploy.sh"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolution_is_deterministic_and_sorted() {
        let shuffled = vec![
            "manifests/z.yaml".to_string(),
            ".upshift/promotion.json".to_string(),
            "manifests/a.yaml".to_string(),
            "config/environment.json".to_string(),
        ];
        let first = resolve_all(&shuffled, ctx(true)).unwrap();
        let mut reversed = shuffled.clone();
        reversed.reverse();
        let second = resolve_all(&reversed, ctx(true)).unwrap();

        assert_eq!(first, second);
        let order: Vec<&str> = first.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            order,
            vec![
                ".upshift/promotion.json",
                "config/environment.json",
                "manifests/a.yaml",
                "manifests/z.yaml",
            ]
        );
    }

    #[test]
    fn test_duplicate_paths_resolve_once() {
        let paths = vec![
            "manifests/a.yaml".to_string(),
            "manifests/a.yaml".to_string(),
        ];
        let resolved = resolve_all(&paths, ctx(false)).unwrap();
        assert_eq!(resolved.len(), 1);
    }
}
