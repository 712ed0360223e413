//! Environment branch tree layout
//!
//! Every environment branch carries the same file tree:
//!
//! ```text
//! config/
//!   platform.json      platform layer (cluster-wide defaults, annotations)
//!   apps.json          app layer (per-app defaults + deployable-name registry)
//!   environment.json   environment layer (the per-app entries promotion edits)
//! manifests/           rendered deployment manifests (regenerated, never edited)
//! .upshift/            branch-local promotion markers
//! ```

/// Environment-layer config file; the only file a promotion merge mutates.
pub const ENVIRONMENT_CONFIG_PATH: &str = "config/environment.json";

/// App-layer defaults and the deployable-name registry.
pub const APP_CONFIG_PATH: &str = "config/apps.json";

/// Platform-layer defaults.
pub const PLATFORM_CONFIG_PATH: &str = "config/platform.json";

/// Rendered manifests live under this prefix and are always regenerated.
pub const MANIFEST_DIR: &str = "manifests/";

/// Branch-local marker files live under this prefix.
pub const MARKER_DIR: &str = ".upshift/";
