//! Promotion merge: carry selected fields from a source environment's config
//! into a target environment's config
//!
//! The merge is field-aware, not textual. Only the container image reference
//! moves between environments; everything an environment owns about how it
//! runs an app (namespace, replica count, resources, debug flag, environment
//! label) is left exactly as the target had it. Categories we know diverge but
//! do not carry yet are reported as pending instead of copied.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use upshift_config::{ConfigDocument, ConfigPath};

use crate::error::{MergeError, MergeResult};

/// The only field copied source -> target by a promotion merge.
pub const PROMOTED_FIELD: &str = "image";

/// Target-owned fields a promotion merge never rewrites.
pub const PRESERVED_FIELDS: &[&str] = &[
    "namespace",
    "replicas",
    "resources",
    "debug",
    "labels.environment",
];

/// Categories recognized as divergent but not yet carried by promotion.
/// Differences here are flagged, never copied.
pub const PENDING_FIELDS: &[&str] = &["configMap.data", "envVars"];

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Which apps a merge is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppSelection {
    /// Every app present in the source document.
    All,
    /// Only the listed config identifiers; everything else stays untouched.
    Only(BTreeSet<String>),
}

impl AppSelection {
    pub fn only<I, S>(apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(apps.into_iter().map(Into::into).collect())
    }

    pub fn includes(&self, app: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(apps) => apps.contains(app),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why an app was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Present in the source but not deployed to the target environment.
    AbsentFromTarget,
    /// Excluded by an operator-supplied app list.
    NotSelected,
}

/// One app whose image reference was carried to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotedApp {
    /// Config-tree identifier of the app.
    pub app: String,
    /// Image the target had before the merge, if any.
    pub previous_image: Option<String>,
    /// Image carried over from the source.
    pub new_image: String,
}

/// One app the merge deliberately did not touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedApp {
    pub app: String,
    pub reason: SkipReason,
}

/// A divergent field in a category promotion does not carry yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingField {
    pub app: String,
    /// Path of the field relative to the app entry, e.g. `configMap.data`.
    pub field: String,
}

/// Result of a promotion merge over one (source, target) document pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Apps whose image reference changed in the target.
    pub promoted: Vec<PromotedApp>,
    /// Apps left untouched, with the reason.
    pub skipped: Vec<SkippedApp>,
    /// Divergent fields promotion recognized but did not copy.
    pub pending: Vec<PendingField>,
    /// Selected apps whose target image already matched the source.
    pub unchanged: usize,
}

impl MergeOutcome {
    /// True when the merge wrote nothing to the target document.
    pub fn is_noop(&self) -> bool {
        self.promoted.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "promoted {} app(s), {} unchanged, {} skipped, {} pending field(s)",
            self.promoted.len(),
            self.unchanged,
            self.skipped.len(),
            self.pending.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Carry the promotable fields of every selected source app into `target`.
///
/// Guarantees:
/// - only `image` under selected, target-present apps is ever written
/// - apps absent from the target are skipped with a warning, never invented
/// - pending categories are flagged but never copied
/// - a malformed source entry (missing image) fails the whole merge before
///   any conclusion is drawn; callers snapshot the target beforehand
pub fn promote_apps(
    source: &ConfigDocument,
    target: &mut ConfigDocument,
    selection: &AppSelection,
) -> MergeResult<MergeOutcome> {
    let mut outcome = MergeOutcome::default();

    for app in source.root_keys() {
        if !selection.includes(&app) {
            debug!(app = %app, "app not selected, leaving target entry untouched");
            outcome.skipped.push(SkippedApp {
                app,
                reason: SkipReason::NotSelected,
            });
            continue;
        }

        let app_path = ConfigPath::from_segments([app.as_str()]);
        if !target.contains(&app_path) {
            warn!(app = %app, "app absent from target environment, skipping");
            outcome.skipped.push(SkippedApp {
                app,
                reason: SkipReason::AbsentFromTarget,
            });
            continue;
        }

        let image_path = app_path.child(PROMOTED_FIELD);
        let new_image = source
            .get_str(&image_path)
            .ok_or_else(|| MergeError::MissingImage { app: app.clone() })?
            .to_string();
        let previous_image = target.get_str(&image_path).map(str::to_string);

        for field in PENDING_FIELDS {
            let field_path = append_relative(&app_path, field);
            let in_source = source.get(&field_path);
            if in_source.is_some() && in_source != target.get(&field_path) {
                warn!(
                    app = %app,
                    field = %field,
                    "field differs between environments but is not carried by promotion"
                );
                outcome.pending.push(PendingField {
                    app: app.clone(),
                    field: (*field).to_string(),
                });
            }
        }

        match previous_image {
            Some(ref existing) if *existing == new_image => {
                debug!(app = %app, image = %new_image, "target already at source image");
                outcome.unchanged += 1;
            }
            _ => {
                target.set(&image_path, Value::String(new_image.clone()))?;
                outcome.promoted.push(PromotedApp {
                    app: app.clone(),
                    previous_image,
                    new_image,
                });
            }
        }
    }

    Ok(outcome)
}

fn append_relative(base: &ConfigPath, relative: &str) -> ConfigPath {
    let mut path = base.clone();
    for segment in relative.split('.') {
        path = path.child(segment);
    }
    path
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

/// Hex SHA-256 of arbitrary file content. Used to prove branches and config
/// entries outside a merge's footprint came through byte-identical.
pub fn content_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Digest of one app's config entry, `None` when the app is absent.
pub fn app_digest(doc: &ConfigDocument, app: &str) -> Option<String> {
    let value = doc.get(&ConfigPath::from_segments([app]))?;
    // Value serialization with string keys cannot fail
    let text = serde_json::to_string(value).expect("serialize config value");
    Some(content_digest(&text))
}

/// Digest of a whole document in its canonical serialized form.
pub fn document_digest(doc: &ConfigDocument) -> String {
    content_digest(&doc.to_pretty_string())
}
