//! Promotion merge semantics for environment config trees
//!
//! Two concerns live here, both pure functions over documents and paths:
//!
//! - the field-aware promotion merge (which fields travel between
//!   environments, which stay put, which are only flagged), and
//! - the conflict strategy table applied when a work branch must be
//!   reconciled against a moving environment branch.
//!
//! Branch and file I/O stay with the caller; this crate never talks to a
//! review-request host.

mod conflict;
mod error;
mod layout;
mod promote;

pub use conflict::{classify, resolve_all, ConflictContext, ConflictRule, PathResolution, Side};
pub use error::{MergeError, MergeResult};
pub use layout::{
    APP_CONFIG_PATH, ENVIRONMENT_CONFIG_PATH, MANIFEST_DIR, MARKER_DIR, PLATFORM_CONFIG_PATH,
};
pub use promote::{
    app_digest, content_digest, document_digest, promote_apps, AppSelection, MergeOutcome,
    PendingField, PromotedApp, SkipReason, SkippedApp, PENDING_FIELDS, PRESERVED_FIELDS,
    PROMOTED_FIELD,
};
