//! Structured config changes outside promotion.
//!
//! Operator edits to the layered config tree: config-map entries on the
//! environment and app layers, the editable per-environment scalars, and
//! platform annotations. Every edit is applied to a parsed document, never
//! to raw text, and the whole tree is validated before anything lands on a
//! branch. Changes go through a review request like promotions do unless
//! the caller asks for a direct commit.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use upshift_config::{
    apply_validated_edit, ConfigDocument, ConfigLayer, ConfigPath, LayeredConfig,
};
use upshift_gitops::{GitopsError, NewReviewRequest, ReviewRequestId};
use upshift_merge::{
    resolve_all, ConflictContext, APP_CONFIG_PATH, ENVIRONMENT_CONFIG_PATH, PLATFORM_CONFIG_PATH,
};

use crate::domain::{AppRegistry, Environment, PromoteError, Result};
use crate::orchestrator::{write_staged, PromotionEngine};

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

/// One structured change to the config tree of an environment branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEdit {
    /// Add or update a config-map entry on an app's environment entry.
    SetEnvConfigMapEntry {
        app: String,
        key: String,
        value: String,
    },
    /// Remove a config-map entry from an app's environment entry. The
    /// `data` object stays, even when this removes its last entry.
    UnsetEnvConfigMapEntry { app: String, key: String },
    /// Add or update a default config-map entry on the app layer.
    SetAppConfigMapEntry {
        app: String,
        key: String,
        value: String,
    },
    /// Remove a default config-map entry from the app layer.
    UnsetAppConfigMapEntry { app: String, key: String },
    /// Override an editable per-environment scalar (`replicas`, `debug`).
    SetEnvField {
        app: String,
        field: String,
        value: String,
    },
    /// Remove a per-environment scalar override.
    UnsetEnvField { app: String, field: String },
    /// Add or update a platform-layer annotation.
    SetPlatformAnnotation { key: String, value: String },
    /// Remove a platform-layer annotation.
    UnsetPlatformAnnotation { key: String },
}

enum EditAction {
    Set(Value),
    Remove,
}

struct ResolvedEdit {
    layer: ConfigLayer,
    path: ConfigPath,
    action: EditAction,
}

impl ConfigEdit {
    /// The app identifier the edit is scoped to, if any. Platform
    /// annotations are app-independent.
    fn app(&self) -> Option<&str> {
        match self {
            ConfigEdit::SetEnvConfigMapEntry { app, .. }
            | ConfigEdit::UnsetEnvConfigMapEntry { app, .. }
            | ConfigEdit::SetAppConfigMapEntry { app, .. }
            | ConfigEdit::UnsetAppConfigMapEntry { app, .. }
            | ConfigEdit::SetEnvField { app, .. }
            | ConfigEdit::UnsetEnvField { app, .. } => Some(app),
            ConfigEdit::SetPlatformAnnotation { .. }
            | ConfigEdit::UnsetPlatformAnnotation { .. } => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ConfigEdit::SetEnvConfigMapEntry { app, key, .. } => {
                format!("set {app}.configMap.data.{key}")
            }
            ConfigEdit::UnsetEnvConfigMapEntry { app, key } => {
                format!("unset {app}.configMap.data.{key}")
            }
            ConfigEdit::SetAppConfigMapEntry { app, key, .. } => {
                format!("set app-default {app}.configMap.data.{key}")
            }
            ConfigEdit::UnsetAppConfigMapEntry { app, key } => {
                format!("unset app-default {app}.configMap.data.{key}")
            }
            ConfigEdit::SetEnvField { app, field, .. } => format!("set {app}.{field}"),
            ConfigEdit::UnsetEnvField { app, field } => format!("unset {app}.{field}"),
            ConfigEdit::SetPlatformAnnotation { key, .. } => {
                format!("set platform annotation {key}")
            }
            ConfigEdit::UnsetPlatformAnnotation { key } => {
                format!("unset platform annotation {key}")
            }
        }
    }

    fn resolved(&self) -> Result<ResolvedEdit> {
        let edit = match self {
            ConfigEdit::SetEnvConfigMapEntry { app, key, value } => ResolvedEdit {
                layer: ConfigLayer::Environment,
                path: config_map_path(app, key),
                action: EditAction::Set(Value::String(value.clone())),
            },
            ConfigEdit::UnsetEnvConfigMapEntry { app, key } => ResolvedEdit {
                layer: ConfigLayer::Environment,
                path: config_map_path(app, key),
                action: EditAction::Remove,
            },
            ConfigEdit::SetAppConfigMapEntry { app, key, value } => ResolvedEdit {
                layer: ConfigLayer::App,
                path: config_map_path(app, key),
                action: EditAction::Set(Value::String(value.clone())),
            },
            ConfigEdit::UnsetAppConfigMapEntry { app, key } => ResolvedEdit {
                layer: ConfigLayer::App,
                path: config_map_path(app, key),
                action: EditAction::Remove,
            },
            ConfigEdit::SetEnvField { app, field, value } => ResolvedEdit {
                layer: ConfigLayer::Environment,
                path: ConfigPath::from_segments([app.as_str(), field.as_str()]),
                action: EditAction::Set(env_field_value(field, value)?),
            },
            ConfigEdit::UnsetEnvField { app, field } => {
                require_editable(field)?;
                ResolvedEdit {
                    layer: ConfigLayer::Environment,
                    path: ConfigPath::from_segments([app.as_str(), field.as_str()]),
                    action: EditAction::Remove,
                }
            }
            ConfigEdit::SetPlatformAnnotation { key, value } => ResolvedEdit {
                layer: ConfigLayer::Platform,
                path: ConfigPath::from_segments(["annotations", key.as_str()]),
                action: EditAction::Set(Value::String(value.clone())),
            },
            ConfigEdit::UnsetPlatformAnnotation { key } => ResolvedEdit {
                layer: ConfigLayer::Platform,
                path: ConfigPath::from_segments(["annotations", key.as_str()]),
                action: EditAction::Remove,
            },
        };
        Ok(edit)
    }
}

fn config_map_path(app: &str, key: &str) -> ConfigPath {
    ConfigPath::from_segments([app, "configMap", "data", key])
}

fn require_editable(field: &str) -> Result<()> {
    match field {
        "replicas" | "debug" => Ok(()),
        _ => Err(PromoteError::FieldNotEditable {
            field: field.to_string(),
        }),
    }
}

fn env_field_value(field: &str, raw: &str) -> Result<Value> {
    require_editable(field)?;
    match field {
        "replicas" => raw.parse::<u64>().map(|n| json!(n)).map_err(|_| {
            PromoteError::FieldValue {
                field: field.to_string(),
                expected: "a non-negative integer",
            }
        }),
        _ => raw
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|_| PromoteError::FieldValue {
                field: field.to_string(),
                expected: "true or false",
            }),
    }
}

fn layer_file(layer: ConfigLayer) -> &'static str {
    match layer {
        ConfigLayer::Environment => ENVIRONMENT_CONFIG_PATH,
        ConfigLayer::App => APP_CONFIG_PATH,
        ConfigLayer::Platform => PLATFORM_CONFIG_PATH,
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// How a config change reaches the environment branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDelivery {
    /// Commit straight to the environment branch.
    Direct,
    /// Work branch plus review request, merged after CI passes.
    ViaReview,
}

/// The audit record of one structured config change.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfigChangeReport {
    pub environment: Environment,
    pub summary: String,
    /// False when the tree already carried the requested state.
    pub applied: bool,
    /// Head of the environment branch after the change landed.
    pub commit: Option<String>,
    pub review_request: Option<ReviewRequestId>,
    pub completed_at: DateTime<Utc>,
}

impl PromotionEngine {
    /// Apply one structured edit to an environment's config tree.
    ///
    /// The edit runs against a staged copy of the tree and the whole tree is
    /// schema-validated before any branch is written. An edit that changes
    /// nothing reports `applied: false` and touches no branch.
    pub async fn apply_config_change(
        &self,
        environment: Environment,
        edit: &ConfigEdit,
        delivery: ChangeDelivery,
    ) -> Result<ConfigChangeReport> {
        let resolved = edit.resolved()?;
        let branch = environment.branch();
        let summary = edit.summary();

        if let Some(app) = edit.app() {
            let registry = AppRegistry::from_document(&ConfigDocument::parse(
                &self.fetch_lenient(APP_CONFIG_PATH, &branch).await?,
            )?);
            registry.require(app)?;
        }

        match delivery {
            ChangeDelivery::Direct => {
                self.deliver_direct(environment, &branch, &resolved, summary)
                    .await
            }
            ChangeDelivery::ViaReview => {
                self.deliver_via_review(environment, &branch, &resolved, summary)
                    .await
            }
        }
    }

    async fn deliver_direct(
        &self,
        environment: Environment,
        branch: &str,
        resolved: &ResolvedEdit,
        summary: String,
    ) -> Result<ConfigChangeReport> {
        let Some((staged, rendered)) = self.prepare_edit(branch, resolved).await? else {
            return Ok(self.unchanged_report(environment, summary));
        };
        let message = format!("config: {summary}");
        self.host
            .update_file(layer_file(resolved.layer), branch, &rendered, &message)
            .await?;
        self.regenerate_manifests(staged.path(), branch, "config: regenerate manifests")
            .await?;
        let head = self.host.last_commit(branch).await?;
        info!(
            event = "config.applied",
            environment = %environment,
            change = %summary,
            commit = %head.sha,
        );
        Ok(ConfigChangeReport {
            environment,
            summary,
            applied: true,
            commit: Some(head.sha),
            review_request: None,
            completed_at: Utc::now(),
        })
    }

    async fn deliver_via_review(
        &self,
        environment: Environment,
        branch: &str,
        resolved: &ResolvedEdit,
        summary: String,
    ) -> Result<ConfigChangeReport> {
        let mut rebuilds = 0;
        loop {
            // re-staged every attempt so the edit re-applies on a moved base
            let Some((staged, rendered)) = self.prepare_edit(branch, resolved).await? else {
                return Ok(self.unchanged_report(environment, summary));
            };

            let base = self.settings.config_branch(environment, Utc::now());
            let work = if rebuilds > 0 {
                format!("{base}-{}", rebuilds + 1)
            } else {
                base
            };
            self.host.create_branch(&work, branch).await?;
            self.host
                .update_file(
                    layer_file(resolved.layer),
                    &work,
                    &rendered,
                    &format!("config: {summary}"),
                )
                .await?;
            self.regenerate_manifests(staged.path(), &work, "config: regenerate manifests")
                .await?;

            let review = self
                .host
                .create_review_request(NewReviewRequest {
                    source_branch: work.clone(),
                    target_branch: branch.to_string(),
                    title: format!("Config change on {environment}: {summary}"),
                    description: format!(
                        "Structured config change.\n\n- environment: {environment}\n- change: {summary}\n"
                    ),
                })
                .await?;
            self.await_ci(review.id).await?;

            let fresh = self.host.get_review_request(review.id).await?;
            if !fresh.has_conflicts {
                match self.host.merge_review_request(review.id).await {
                    Ok(()) => {
                        let head = self.host.last_commit(branch).await?;
                        if let Err(err) = self.host.delete_branch(&work).await {
                            warn!(event = "config.branch_delete_failed", branch = %work, error = %err);
                        }
                        info!(
                            event = "config.applied",
                            environment = %environment,
                            change = %summary,
                            review_request = %review.id,
                            commit = %head.sha,
                        );
                        return Ok(ConfigChangeReport {
                            environment,
                            summary,
                            applied: true,
                            commit: Some(head.sha),
                            review_request: Some(review.id),
                            completed_at: Utc::now(),
                        });
                    }
                    Err(GitopsError::NotMergeable { .. })
                        if rebuilds < self.settings.max_reconcile_attempts => {}
                    Err(err) => return Err(err.into()),
                }
            } else if rebuilds >= self.settings.max_reconcile_attempts {
                return Err(PromoteError::Timeout {
                    operation: format!("merge of {}", review.id),
                    last_status: format!("conflicts persisted after {rebuilds} rebuild(s)"),
                });
            }
            rebuilds += 1;

            let conflicted = self.host.conflicting_paths(review.id).await?;
            resolve_all(
                &conflicted,
                ConflictContext {
                    during_promotion: false,
                },
            )?;
            info!(
                event = "config.rebuild",
                environment = %environment,
                attempt = rebuilds,
                change = %summary,
            );
            if let Err(err) = self
                .host
                .close_review_request(review.id, Some("recreating after target branch moved"))
                .await
            {
                warn!(event = "config.close_failed", review_request = %review.id, error = %err);
            }
            if let Err(err) = self.host.delete_branch(&work).await {
                warn!(event = "config.branch_delete_failed", branch = %work, error = %err);
            }
        }
    }

    /// Stage the branch's tree, apply the edit transactionally, and return
    /// the staged tree plus the re-rendered layer. `None` when the edit
    /// changes nothing.
    async fn prepare_edit(
        &self,
        branch: &str,
        resolved: &ResolvedEdit,
    ) -> Result<Option<(TempDir, String)>> {
        let staged = tempfile::tempdir()?;
        let environment = self.fetch_file(ENVIRONMENT_CONFIG_PATH, branch).await?;
        let apps = self.fetch_lenient(APP_CONFIG_PATH, branch).await?;
        let platform = self.fetch_lenient(PLATFORM_CONFIG_PATH, branch).await?;
        write_staged(staged.path(), ENVIRONMENT_CONFIG_PATH, &environment)?;
        write_staged(staged.path(), APP_CONFIG_PATH, &apps)?;
        write_staged(staged.path(), PLATFORM_CONFIG_PATH, &platform)?;

        let original = match resolved.layer {
            ConfigLayer::Environment => &environment,
            ConfigLayer::App => &apps,
            ConfigLayer::Platform => &platform,
        };
        let before = ConfigDocument::parse(original)?.to_pretty_string();

        let edited = apply_validated_edit(
            staged.path(),
            Path::new(layer_file(resolved.layer)),
            self.evaluator.as_ref(),
            |doc| {
                match &resolved.action {
                    EditAction::Set(value) => doc.set(&resolved.path, value.clone())?,
                    EditAction::Remove => {
                        doc.remove(&resolved.path);
                    }
                }
                Ok(())
            },
        )
        .await?;

        let rendered = edited.to_pretty_string();
        if rendered == before {
            debug!(event = "config.no_changes", branch, layer = %resolved.layer);
            return Ok(None);
        }
        Ok(Some((staged, rendered)))
    }

    fn unchanged_report(&self, environment: Environment, summary: String) -> ConfigChangeReport {
        info!(
            event = "config.no_changes",
            environment = %environment,
            change = %summary,
        );
        ConfigChangeReport {
            environment,
            summary,
            applied: false,
            commit: None,
            review_request: None,
            completed_at: Utc::now(),
        }
    }

    /// The effective config of an environment, with layer attribution.
    pub async fn effective_config(&self, environment: Environment) -> Result<LayeredConfig> {
        let branch = environment.branch();
        let platform =
            ConfigDocument::parse(&self.fetch_lenient(PLATFORM_CONFIG_PATH, &branch).await?)?;
        let app = ConfigDocument::parse(&self.fetch_lenient(APP_CONFIG_PATH, &branch).await?)?;
        let env =
            ConfigDocument::parse(&self.fetch_file(ENVIRONMENT_CONFIG_PATH, &branch).await?)?;
        Ok(LayeredConfig::new(
            platform.as_value().clone(),
            app.as_value().clone(),
            env.as_value().clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_replicas_and_debug_are_editable() {
        let err = env_field_value("namespace", "other").unwrap_err();
        assert!(matches!(err, PromoteError::FieldNotEditable { .. }));

        assert_eq!(env_field_value("replicas", "3").unwrap(), json!(3));
        assert_eq!(env_field_value("debug", "true").unwrap(), json!(true));
    }

    #[test]
    fn test_field_values_are_typed() {
        let err = env_field_value("replicas", "lots").unwrap_err();
        assert!(err.to_string().contains("non-negative integer"), "got: {err}");

        let err = env_field_value("debug", "yes").unwrap_err();
        assert!(err.to_string().contains("true or false"), "got: {err}");
    }

    #[test]
    fn test_edit_paths() {
        let resolved = ConfigEdit::SetEnvConfigMapEntry {
            app: "exampleApp".to_string(),
            key: "LOG_LEVEL".to_string(),
            value: "debug".to_string(),
        }
        .resolved()
        .unwrap();
        assert_eq!(resolved.layer, ConfigLayer::Environment);
        assert_eq!(
            resolved.path.segments().join("."),
            "exampleApp.configMap.data.LOG_LEVEL"
        );

        let resolved = ConfigEdit::UnsetPlatformAnnotation {
            key: "team".to_string(),
        }
        .resolved()
        .unwrap();
        assert_eq!(resolved.layer, ConfigLayer::Platform);
        assert_eq!(resolved.path.segments().join("."), "annotations.team");
    }

    #[test]
    fn test_summaries_name_the_change() {
        let edit = ConfigEdit::SetEnvField {
            app: "exampleApp".to_string(),
            field: "replicas".to_string(),
            value: "3".to_string(),
        };
        assert_eq!(edit.summary(), "set exampleApp.replicas");
        let edit = ConfigEdit::UnsetAppConfigMapEntry {
            app: "exampleApp".to_string(),
            key: "TIMEOUT".to_string(),
        };
        assert_eq!(edit.summary(), "unset app-default exampleApp.configMap.data.TIMEOUT");
    }
}
