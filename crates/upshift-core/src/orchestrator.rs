//! The promotion state machine.
//!
//! One engine instance drives every flow variant. A promotion runs through
//! the checkpoints in [`FlowStep`] order: resolve what moves, open a
//! timestamped work branch off the target environment branch, move the
//! artifact and image, apply the semantic config merge, regenerate rendered
//! manifests, open a review request, wait for CI, merge, and finally wait
//! for the sync agent to report the new revision healthy.
//!
//! The engine is stateless between invocations; the environment branches are
//! the durable state. Abandoning a flow (dropping its future) leaves no
//! in-process residue, only whatever external state the completed steps
//! already wrote. Every mutating step logs what it changed so an abandoned
//! flow can be audited.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::{debug, info, warn, Instrument};
use upshift_config::{ConfigDocument, ConfigEvaluator, ConfigPath};
use upshift_gitops::{
    ArtifactRepository, CiStatus, GitopsError, HealthState, ImageReference, ImageRegistry,
    NewReviewRequest, RepositoryKind, ReviewRequest, ReviewRequestHost, ReviewRequestId,
    SyncAgent, SyncState,
};
use upshift_merge::{
    promote_apps, resolve_all, AppSelection, ConflictContext, MergeError, MergeOutcome,
    APP_CONFIG_PATH, ENVIRONMENT_CONFIG_PATH, MANIFEST_DIR, PLATFORM_CONFIG_PATH,
};
use uuid::Uuid;

use crate::domain::{
    AppRegistry, ArtifactVersion, FlowDisposition, FlowStep, PromoteError, PromotionReport,
    PromotionRequest, Result, StepRecord, TriggerMode,
};
use crate::obs;
use crate::progression::{self, Progression};
use crate::promoter::ArtifactPromoter;
use crate::retry::{poll_until, PollOutcome};
use crate::settings::EngineSettings;

/// Provenance marker committed to every work branch.
const PROMOTION_MARKER_PATH: &str = ".upshift/promotion.json";

// ---------------------------------------------------------------------------
// Change plans
// ---------------------------------------------------------------------------

/// Everything a resolved change needs to run through the pipeline.
pub(crate) struct ChangePlan {
    /// Identifier-to-deployable lookup for sync waits.
    pub(crate) registry: AppRegistry,
    /// Source document the merge copies promotable fields from. For a
    /// promotion this is the source environment config with the promoted
    /// tag already substituted; for a skip sub-flow it is synthetic.
    pub(crate) source: ConfigDocument,
    /// Version label for titles, commit messages and the report.
    pub(crate) tag: String,
    /// Artifact/image movement; `None` for config-only flows.
    pub(crate) artifacts: Option<ArtifactMove>,
}

/// The artifact half of a promotion.
pub(crate) struct ArtifactMove {
    pub(crate) deployable: String,
    pub(crate) old_image: ImageReference,
    pub(crate) current: ArtifactVersion,
    pub(crate) next: ArtifactVersion,
    pub(crate) source_kind: RepositoryKind,
    pub(crate) target_kind: RepositoryKind,
}

enum Resolution {
    Plan(Box<ChangePlan>),
    AlreadyPromoted { existing: ArtifactVersion },
}

enum MergedConfig {
    Applied { staged: TempDir, outcome: MergeOutcome },
    Unchanged { outcome: MergeOutcome },
}

enum Prepared {
    Open(OpenedReview),
    Unchanged { outcome: MergeOutcome },
}

struct OpenedReview {
    work_branch: String,
    review: ReviewRequest,
    outcome: MergeOutcome,
    superseded: Vec<ReviewRequestId>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives promotions, skip flows and structured config changes against the
/// injected external collaborators.
#[derive(Clone)]
pub struct PromotionEngine {
    pub(crate) host: Arc<dyn ReviewRequestHost>,
    pub(crate) sync: Arc<dyn SyncAgent>,
    pub(crate) evaluator: Arc<dyn ConfigEvaluator>,
    pub(crate) releases: Arc<dyn ArtifactRepository>,
    pub(crate) promoter: ArtifactPromoter,
    pub(crate) settings: EngineSettings,
}

impl PromotionEngine {
    pub fn new(
        host: Arc<dyn ReviewRequestHost>,
        sync: Arc<dyn SyncAgent>,
        evaluator: Arc<dyn ConfigEvaluator>,
        snapshots: Arc<dyn ArtifactRepository>,
        releases: Arc<dyn ArtifactRepository>,
        images: Arc<dyn ImageRegistry>,
    ) -> Self {
        Self::with_settings(
            host,
            sync,
            evaluator,
            snapshots,
            releases,
            images,
            EngineSettings::default(),
        )
    }

    pub fn with_settings(
        host: Arc<dyn ReviewRequestHost>,
        sync: Arc<dyn SyncAgent>,
        evaluator: Arc<dyn ConfigEvaluator>,
        snapshots: Arc<dyn ArtifactRepository>,
        releases: Arc<dyn ArtifactRepository>,
        images: Arc<dyn ImageRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let promoter =
            ArtifactPromoter::new(snapshots, releases.clone(), images, settings.retry);
        PromotionEngine {
            host,
            sync,
            evaluator,
            releases,
            promoter,
            settings,
        }
    }

    /// Run one promotion request to completion.
    ///
    /// Returns a report for every non-error terminal state, including the
    /// no-op dispositions (already promoted, suppressed, no changes). A
    /// returned error names the step the flow died in and leaves any work
    /// branch in place for inspection.
    pub async fn promote(&self, request: PromotionRequest) -> Result<PromotionReport> {
        let span = obs::flow_span(request.id);
        async move {
            obs::emit_flow_started(
                request.id,
                request.source,
                request.target,
                request.mode.as_str(),
            );
            let mut steps = Vec::new();

            // Auto triggers stand down when the source head is a rollback; the
            // rolled-back state must not cascade into the next environment.
            if request.mode == TriggerMode::Auto {
                let suppressed = self
                    .rollback_at_head(&request.source.branch())
                    .await
                    .map_err(|e| self.fail(&request, FlowStep::Start, e))?;
                if suppressed {
                    info!(event = "promotion.suppressed", source = %request.source);
                    record(
                        &mut steps,
                        request.id,
                        FlowStep::Start,
                        "suppressed: rollback at source head",
                    );
                    let report = self.close_report(
                        &request,
                        FlowDisposition::SuppressedByRollback,
                        None,
                        None,
                        None,
                        None,
                        steps,
                        Vec::new(),
                    );
                    return Ok(report);
                }
            }

            let plan = match self
                .resolve(&request)
                .await
                .map_err(|e| self.fail(&request, FlowStep::Start, e))?
            {
                Resolution::AlreadyPromoted { existing } => {
                    record(
                        &mut steps,
                        request.id,
                        FlowStep::Start,
                        format!("target already carries {existing}"),
                    );
                    let report = self.close_report(
                        &request,
                        FlowDisposition::AlreadyPromoted,
                        Some(existing.to_string()),
                        None,
                        None,
                        None,
                        steps,
                        Vec::new(),
                    );
                    return Ok(report);
                }
                Resolution::Plan(plan) => plan,
            };
            record(
                &mut steps,
                request.id,
                FlowStep::Start,
                format!("resolved promotion to {}", plan.tag),
            );

            self.run_change(&request, &plan, steps).await
        }
        .instrument(span)
        .await
    }

    /// The shared pipeline: work branch, artifact movement, config merge,
    /// manifests, review request, CI, merge (with conflict reconciliation),
    /// sync confirmation. Used by `promote` and by skip-environment
    /// sub-flows.
    pub(crate) async fn run_change(
        &self,
        request: &PromotionRequest,
        plan: &ChangePlan,
        mut steps: Vec<StepRecord>,
    ) -> Result<PromotionReport> {
        let result = self.drive_change(request, plan, &mut steps).await;
        match result {
            Ok(report) => Ok(report),
            Err(err) => {
                let step = match &err {
                    PromoteError::Step { step, .. } => *step,
                    _ => FlowStep::Start,
                };
                obs::emit_flow_failed(request.id, step, &err);
                Err(err)
            }
        }
    }

    async fn drive_change(
        &self,
        request: &PromotionRequest,
        plan: &ChangePlan,
        steps: &mut Vec<StepRecord>,
    ) -> Result<PromotionReport> {
        let target_branch = request.target.branch();
        let mut superseded = Vec::new();

        let mut opened = match self.prepare_review(request, plan, 1, steps).await? {
            Prepared::Open(opened) => opened,
            Prepared::Unchanged { outcome } => {
                return Ok(self.close_report(
                    request,
                    FlowDisposition::NoChanges,
                    Some(plan.tag.clone()),
                    None,
                    None,
                    Some(outcome),
                    std::mem::take(steps),
                    superseded,
                ));
            }
        };
        superseded.append(&mut opened.superseded);

        // Merge, rebuilding the work branch when the target environment
        // branch moves underneath the open review request.
        let mut rebuilds = 0;
        let merged_sha = loop {
            let fresh = self
                .host
                .get_review_request(opened.review.id)
                .await
                .map_err(|e| PromoteError::at_step(FlowStep::Merged, e.into()))?;
            if !fresh.has_conflicts {
                match self.host.merge_review_request(opened.review.id).await {
                    Ok(()) => {
                        let head = self
                            .host
                            .last_commit(&target_branch)
                            .await
                            .map_err(|e| PromoteError::at_step(FlowStep::Merged, e.into()))?;
                        break head.sha;
                    }
                    // target moved between the conflict check and the merge
                    Err(GitopsError::NotMergeable { .. })
                        if rebuilds < self.settings.max_reconcile_attempts => {}
                    Err(err) => {
                        return Err(PromoteError::at_step(FlowStep::Merged, err.into()))
                    }
                }
            } else if rebuilds >= self.settings.max_reconcile_attempts {
                return Err(PromoteError::at_step(
                    FlowStep::Merged,
                    PromoteError::Timeout {
                        operation: format!("merge of {}", opened.review.id),
                        last_status: format!("conflicts persisted after {rebuilds} rebuild(s)"),
                    },
                ));
            }
            rebuilds += 1;

            // Every conflicted path must be covered by a resolution rule
            // before the branch is rebuilt; an unknown path fails closed.
            let conflicted = self
                .host
                .conflicting_paths(opened.review.id)
                .await
                .map_err(|e| PromoteError::at_step(FlowStep::Merged, e.into()))?;
            let resolutions = resolve_all(
                &conflicted,
                ConflictContext {
                    during_promotion: true,
                },
            )
            .map_err(|e| PromoteError::at_step(FlowStep::Merged, e.into()))?;
            info!(
                event = "promotion.rebuild",
                request_id = %request.id,
                attempt = rebuilds,
                resolved_conflicts = resolutions.len(),
            );

            if let Err(err) = self
                .host
                .close_review_request(
                    opened.review.id,
                    Some("recreating after target branch moved"),
                )
                .await
            {
                warn!(event = "promotion.close_failed", review_request = %opened.review.id, error = %err);
            }
            if let Err(err) = self.host.delete_branch(&opened.work_branch).await {
                warn!(event = "promotion.branch_delete_failed", branch = %opened.work_branch, error = %err);
            }

            opened = match self
                .prepare_review(request, plan, rebuilds + 1, steps)
                .await?
            {
                Prepared::Open(opened) => opened,
                Prepared::Unchanged { outcome } => {
                    // The moved target already carries the change.
                    return Ok(self.close_report(
                        request,
                        FlowDisposition::NoChanges,
                        Some(plan.tag.clone()),
                        None,
                        None,
                        Some(outcome),
                        std::mem::take(steps),
                        superseded,
                    ));
                }
            };
            superseded.append(&mut opened.superseded);
        };
        if let Err(err) = self.host.delete_branch(&opened.work_branch).await {
            warn!(event = "promotion.branch_delete_failed", branch = %opened.work_branch, error = %err);
        }
        record(
            steps,
            request.id,
            FlowStep::Merged,
            format!("target at {}", short_sha(&merged_sha)),
        );

        self.await_sync(&plan.registry, &opened.outcome, &merged_sha)
            .await
            .map_err(|e| PromoteError::at_step(FlowStep::SyncConfirmed, e))?;
        record(
            steps,
            request.id,
            FlowStep::SyncConfirmed,
            format!(
                "{} app(s) healthy at {}",
                opened.outcome.promoted.len(),
                short_sha(&merged_sha)
            ),
        );

        record(steps, request.id, FlowStep::Done, "promotion complete");
        Ok(self.close_report(
            request,
            FlowDisposition::Completed,
            Some(plan.tag.clone()),
            Some(opened.work_branch),
            Some(opened.review.id),
            Some(opened.outcome),
            std::mem::take(steps),
            superseded,
        ))
    }

    // -----------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------

    async fn rollback_at_head(&self, branch: &str) -> Result<bool> {
        let head = self.host.last_commit(branch).await?;
        Ok(head.message.contains(&self.settings.rollback_marker))
    }

    async fn resolve(&self, request: &PromotionRequest) -> Result<Resolution> {
        let source_branch = request.source.branch();
        let target_branch = request.target.branch();

        let source_doc = ConfigDocument::parse(
            &self
                .fetch_file(ENVIRONMENT_CONFIG_PATH, &source_branch)
                .await?,
        )?;
        let registry = AppRegistry::from_document(&ConfigDocument::parse(
            &self.fetch_lenient(APP_CONFIG_PATH, &source_branch).await?,
        )?);

        if let AppSelection::Only(selected) = &request.apps {
            if selected.is_empty() {
                return Err(PromoteError::EmptySelection);
            }
            for app in selected {
                if !source_doc.contains(&ConfigPath::from_segments([app.as_str()])) {
                    return Err(PromoteError::UnknownApp { app: app.clone() });
                }
            }
        }

        // The leading app's image decides the version being promoted; with
        // an explicit selection that is its first identifier, otherwise the
        // first app in the source environment.
        let leading_app = match &request.apps {
            AppSelection::Only(selected) => selected.iter().next().cloned(),
            AppSelection::All => source_doc.root_keys().into_iter().next(),
        }
        .ok_or(PromoteError::EmptySelection)?;

        let image_path = ConfigPath::from_segments([leading_app.as_str(), "image"]);
        let image_str = source_doc.get_str(&image_path).ok_or_else(|| {
            PromoteError::Merge(MergeError::MissingImage {
                app: leading_app.clone(),
            })
        })?;
        let literal = ImageReference::parse(image_str)?;
        let old_image = match &request.image_tag {
            Some(tag) => literal.with_tag(tag),
            None => literal.clone(),
        };
        let current = ArtifactVersion::parse(&old_image.tag)?;
        let deployable = registry.deployable_for(&leading_app);

        let target_current = self
            .current_version_of(&target_branch, &image_path)
            .await?;
        let published = self.published_versions(&deployable).await?;

        match progression::next_version(
            request.source,
            request.target,
            &current,
            target_current.as_ref(),
            &published,
        )? {
            Progression::AlreadyPromoted { existing } => {
                Ok(Resolution::AlreadyPromoted { existing })
            }
            Progression::Computed {
                next,
                source_kind,
                target_kind,
            } => {
                // match on the tag the source doc literally carries, so an
                // explicit override still rewrites the selected apps
                let amended =
                    amend_source(&source_doc, &request.apps, &literal.tag, &next.to_string())?;
                let tag = next.to_string();
                let artifacts = if request.skip_artifact_promotion {
                    debug!(event = "promotion.artifacts_skipped", tag = %tag);
                    None
                } else {
                    Some(ArtifactMove {
                        deployable,
                        old_image,
                        current,
                        next,
                        source_kind,
                        target_kind,
                    })
                };
                Ok(Resolution::Plan(Box::new(ChangePlan {
                    registry,
                    source: amended,
                    tag,
                    artifacts,
                })))
            }
        }
    }

    /// The version the branch's leading app currently carries, if it parses.
    async fn current_version_of(
        &self,
        branch: &str,
        image_path: &ConfigPath,
    ) -> Result<Option<ArtifactVersion>> {
        let text = match self
            .settings
            .retry
            .run("config read", || {
                self.host.get_file(ENVIRONMENT_CONFIG_PATH, branch)
            })
            .await
        {
            Ok(text) => text,
            Err(GitopsError::FileNotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let doc = ConfigDocument::parse(&text)?;
        let parsed = doc
            .get_str(image_path)
            .and_then(|s| ImageReference::parse(s).ok())
            .and_then(|r| ArtifactVersion::parse(&r.tag).ok());
        if parsed.is_none() {
            debug!(event = "promotion.target_version_unreadable", branch);
        }
        Ok(parsed)
    }

    async fn published_versions(&self, name: &str) -> Result<Vec<ArtifactVersion>> {
        let raw = self
            .settings
            .retry
            .run("version listing", || self.releases.versions(name))
            .await?;
        let mut versions = Vec::new();
        for tag in raw {
            match ArtifactVersion::parse(&tag) {
                Ok(version) => versions.push(version),
                Err(_) => debug!(event = "promotion.unparseable_version", name, tag = %tag),
            }
        }
        Ok(versions)
    }

    // -----------------------------------------------------------------
    // Work branch construction
    // -----------------------------------------------------------------

    /// Build a work branch and take it to the CI-validated review request.
    /// `attempt` disambiguates branch names when a rebuild lands within the
    /// same second as the original.
    async fn prepare_review(
        &self,
        request: &PromotionRequest,
        plan: &ChangePlan,
        attempt: u32,
        steps: &mut Vec<StepRecord>,
    ) -> Result<Prepared> {
        let work_branch = self
            .open_work_branch(request, plan, attempt)
            .await
            .map_err(|e| PromoteError::at_step(FlowStep::BranchCreated, e))?;
        record(steps, request.id, FlowStep::BranchCreated, work_branch.clone());

        if let Some(artifacts) = &plan.artifacts {
            let outcome = self
                .promoter
                .promote(
                    &artifacts.deployable,
                    &artifacts.old_image,
                    &artifacts.current,
                    &artifacts.next,
                    artifacts.source_kind,
                    artifacts.target_kind,
                )
                .await
                .map_err(|e| PromoteError::at_step(FlowStep::ArtifactPromoted, e))?;
            record(
                steps,
                request.id,
                FlowStep::ArtifactPromoted,
                outcome.summary(),
            );
        }

        let merged = self
            .merge_config(request, plan, &work_branch)
            .await
            .map_err(|e| PromoteError::at_step(FlowStep::ConfigMerged, e))?;
        let (staged, outcome) = match merged {
            MergedConfig::Applied { staged, outcome } => (staged, outcome),
            MergedConfig::Unchanged { outcome } => {
                if let Err(err) = self.host.delete_branch(&work_branch).await {
                    warn!(event = "promotion.branch_delete_failed", branch = %work_branch, error = %err);
                }
                record(
                    steps,
                    request.id,
                    FlowStep::ConfigMerged,
                    format!("no changes to carry ({})", outcome.summary()),
                );
                return Ok(Prepared::Unchanged { outcome });
            }
        };
        record(steps, request.id, FlowStep::ConfigMerged, outcome.summary());

        let manifest_count = self
            .regenerate_manifests(
                staged.path(),
                &work_branch,
                &format!("promote: regenerate manifests for {}", plan.tag),
            )
            .await
            .map_err(|e| PromoteError::at_step(FlowStep::ManifestsRegenerated, e))?;
        record(
            steps,
            request.id,
            FlowStep::ManifestsRegenerated,
            format!("{manifest_count} manifest(s)"),
        );

        let (review, superseded) = self
            .open_review(request, plan, &work_branch, &outcome)
            .await
            .map_err(|e| PromoteError::at_step(FlowStep::ReviewRequestOpened, e))?;
        record(
            steps,
            request.id,
            FlowStep::ReviewRequestOpened,
            format!("{} targeting {}", review.id, review.target_branch),
        );

        self.await_ci(review.id)
            .await
            .map_err(|e| PromoteError::at_step(FlowStep::CiValidated, e))?;
        record(
            steps,
            request.id,
            FlowStep::CiValidated,
            format!("ci passed for {}", review.id),
        );

        Ok(Prepared::Open(OpenedReview {
            work_branch,
            review,
            outcome,
            superseded,
        }))
    }

    async fn open_work_branch(
        &self,
        request: &PromotionRequest,
        plan: &ChangePlan,
        attempt: u32,
    ) -> Result<String> {
        let base = self
            .settings
            .promote_branch(request.source, request.target, Utc::now());
        let name = if attempt > 1 {
            format!("{base}-{attempt}")
        } else {
            base
        };
        self.host.create_branch(&name, &request.target.branch()).await?;

        let marker = ConfigDocument::from_value(json!({
            "request_id": request.id,
            "mode": request.mode.as_str(),
            "source": request.source,
            "target": request.target,
            "tag": plan.tag,
            "requested_at": request.requested_at,
        }))?;
        self.host
            .update_file(
                PROMOTION_MARKER_PATH,
                &name,
                &marker.to_pretty_string(),
                &format!("promote: open work branch for {}", plan.tag),
            )
            .await?;
        Ok(name)
    }

    async fn merge_config(
        &self,
        request: &PromotionRequest,
        plan: &ChangePlan,
        work_branch: &str,
    ) -> Result<MergedConfig> {
        let (staged, mut target_doc) = self.stage_tree(work_branch).await?;
        let outcome = promote_apps(&plan.source, &mut target_doc, &request.apps)?;
        if outcome.is_noop() {
            debug!(event = "promotion.no_changes", branch = work_branch);
            return Ok(MergedConfig::Unchanged { outcome });
        }

        // The environment branch must never see a config that fails the
        // schema check, so validation runs against the staged tree first.
        let rendered = target_doc.to_pretty_string();
        write_staged(staged.path(), ENVIRONMENT_CONFIG_PATH, &rendered)?;
        self.evaluator.validate(staged.path()).await?;

        let message = match request.mode {
            TriggerMode::Skip => {
                format!("promote: carry {} to {} (skip)", plan.tag, request.target)
            }
            _ => format!(
                "promote: carry {} from {} to {}",
                plan.tag, request.source, request.target
            ),
        };
        self.host
            .update_file(ENVIRONMENT_CONFIG_PATH, work_branch, &rendered, &message)
            .await?;
        Ok(MergedConfig::Applied { staged, outcome })
    }

    /// Render the staged tree's manifests and write them to the branch. The
    /// evaluator must yield an object keyed by manifest name.
    pub(crate) async fn regenerate_manifests(
        &self,
        root: &Path,
        branch: &str,
        message: &str,
    ) -> Result<usize> {
        let value = self.evaluator.evaluate(root, "manifests").await?;
        let entries = match value {
            Value::Object(entries) => entries,
            other => {
                return Err(PromoteError::ManifestShape {
                    got: value_kind(&other).to_string(),
                })
            }
        };
        for (name, manifest) in &entries {
            let content = serde_json::to_string_pretty(manifest)? + "\n";
            self.host
                .update_file(&format!("{MANIFEST_DIR}{name}.json"), branch, &content, message)
                .await?;
        }
        Ok(entries.len())
    }

    // -----------------------------------------------------------------
    // Review requests
    // -----------------------------------------------------------------

    async fn open_review(
        &self,
        request: &PromotionRequest,
        plan: &ChangePlan,
        work_branch: &str,
        outcome: &MergeOutcome,
    ) -> Result<(ReviewRequest, Vec<ReviewRequestId>)> {
        let target_branch = request.target.branch();
        let title = match request.mode {
            TriggerMode::Skip => {
                format!("Carry {} to {} (skip promotion)", plan.tag, request.target)
            }
            _ => format!(
                "Promote {} -> {}: {}",
                request.source, request.target, plan.tag
            ),
        };
        let review = self
            .host
            .create_review_request(NewReviewRequest {
                source_branch: work_branch.to_string(),
                target_branch: target_branch.clone(),
                title,
                description: review_description(request, plan, outcome),
            })
            .await?;

        // Older open promotions against the same environment are stale the
        // moment this one exists; closing them is best-effort.
        let mut closed = Vec::new();
        match self.host.list_open_review_requests(&target_branch).await {
            Ok(open) => {
                for stale in open {
                    if stale.id == review.id
                        || !self.settings.is_promote_branch(&stale.source_branch)
                    {
                        continue;
                    }
                    let note = format!("superseded by {}", review.id);
                    match self.host.close_review_request(stale.id, Some(&note)).await {
                        Ok(()) => {
                            obs::emit_superseded_closed(request.id, &stale.id.to_string());
                            closed.push(stale.id);
                        }
                        Err(err) => warn!(
                            event = "promotion.supersede_failed",
                            review_request = %stale.id,
                            error = %err,
                        ),
                    }
                }
            }
            Err(err) => warn!(event = "promotion.supersede_failed", error = %err),
        }
        Ok((review, closed))
    }

    pub(crate) async fn await_ci(&self, id: ReviewRequestId) -> Result<()> {
        poll_until(&self.settings.ci_poll, &format!("ci verdict for {id}"), || async move {
            let review = self.host.get_review_request(id).await?;
            match review.ci {
                CiStatus::Passed => Ok(PollOutcome::Ready(())),
                CiStatus::Failed => Err(PromoteError::CiFailed { id }),
                CiStatus::Pending | CiStatus::Running => {
                    Ok(PollOutcome::Pending(format!("ci {:?}", review.ci)))
                }
            }
        })
        .await
    }

    // -----------------------------------------------------------------
    // Sync confirmation
    // -----------------------------------------------------------------

    /// Wait until every promoted app is synced and healthy at `revision`.
    ///
    /// Health is judged only once the agent reports the new revision: a
    /// degradation at the new revision fails the flow, while degradation at
    /// an older revision merely means the rollout has not arrived yet.
    pub(crate) async fn await_sync(
        &self,
        registry: &AppRegistry,
        outcome: &MergeOutcome,
        revision: &str,
    ) -> Result<()> {
        for promoted in &outcome.promoted {
            let app = registry.deployable_for(&promoted.app);
            self.await_sync_of(&app, revision).await?;
        }
        Ok(())
    }

    pub(crate) async fn await_sync_of(&self, app: &str, revision: &str) -> Result<()> {
        poll_until(&self.settings.sync_poll, &format!("sync of {app}"), || {
            let app = app.to_string();
            async move {
                let status = self.sync.status(&app).await?;
                if status.revision != revision {
                    return Ok(PollOutcome::Pending(format!(
                        "revision {} behind {}",
                        short_sha(&status.revision),
                        short_sha(revision)
                    )));
                }
                if status.sync != SyncState::Synced {
                    return Ok(PollOutcome::Pending(format!(
                        "{:?} at target revision",
                        status.sync
                    )));
                }
                match status.health {
                    HealthState::Healthy => Ok(PollOutcome::Ready(())),
                    HealthState::Degraded => Err(PromoteError::SyncUnhealthy {
                        details: format!(
                            "{app} degraded at revision {}",
                            short_sha(revision)
                        ),
                    }),
                    other => Ok(PollOutcome::Pending(format!("health {other:?}"))),
                }
            }
        })
        .await
    }

    // -----------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------

    pub(crate) async fn fetch_file(&self, path: &str, git_ref: &str) -> Result<String> {
        Ok(self
            .settings
            .retry
            .run("config read", || self.host.get_file(path, git_ref))
            .await?)
    }

    /// Like `fetch_file`, but an absent file reads as an empty object; the
    /// app and platform layers are optional.
    pub(crate) async fn fetch_lenient(&self, path: &str, git_ref: &str) -> Result<String> {
        match self
            .settings
            .retry
            .run("config read", || self.host.get_file(path, git_ref))
            .await
        {
            Ok(text) => Ok(text),
            Err(GitopsError::FileNotFound { .. }) => {
                debug!(event = "config.layer_missing", path, git_ref);
                Ok("{}\n".to_string())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Materialize the branch's config tree in a temp directory so the
    /// evaluator can type-check and render it.
    pub(crate) async fn stage_tree(&self, git_ref: &str) -> Result<(TempDir, ConfigDocument)> {
        let staged = tempfile::tempdir()?;
        let environment = self.fetch_file(ENVIRONMENT_CONFIG_PATH, git_ref).await?;
        let apps = self.fetch_lenient(APP_CONFIG_PATH, git_ref).await?;
        let platform = self.fetch_lenient(PLATFORM_CONFIG_PATH, git_ref).await?;
        write_staged(staged.path(), ENVIRONMENT_CONFIG_PATH, &environment)?;
        write_staged(staged.path(), APP_CONFIG_PATH, &apps)?;
        write_staged(staged.path(), PLATFORM_CONFIG_PATH, &platform)?;
        let doc = ConfigDocument::parse(&environment)?;
        Ok((staged, doc))
    }

    #[allow(clippy::too_many_arguments)]
    fn close_report(
        &self,
        request: &PromotionRequest,
        disposition: FlowDisposition,
        tag: Option<String>,
        work_branch: Option<String>,
        review_request: Option<ReviewRequestId>,
        merge: Option<MergeOutcome>,
        steps: Vec<StepRecord>,
        superseded_closed: Vec<ReviewRequestId>,
    ) -> PromotionReport {
        obs::emit_flow_completed(
            request.id,
            disposition.as_str(),
            tag.as_deref().unwrap_or(""),
        );
        PromotionReport {
            request_id: request.id,
            source: request.source,
            target: request.target,
            tag,
            disposition,
            work_branch,
            review_request,
            merge,
            steps,
            superseded_closed,
            completed_at: Utc::now(),
        }
    }

    fn fail(&self, request: &PromotionRequest, step: FlowStep, err: PromoteError) -> PromoteError {
        let err = PromoteError::at_step(step, err);
        obs::emit_flow_failed(request.id, step, &err);
        err
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn record(steps: &mut Vec<StepRecord>, request_id: Uuid, step: FlowStep, detail: impl Into<String>) {
    let entry = StepRecord::now(step, detail);
    obs::emit_step_completed(request_id, step, &entry.detail);
    steps.push(entry);
}

/// Substitute the promoted tag into every selected app that currently
/// carries the old one. Apps pinned to other versions keep their literal
/// source value; the merge copies it forward unchanged.
fn amend_source(
    source: &ConfigDocument,
    selection: &AppSelection,
    old_tag: &str,
    new_tag: &str,
) -> Result<ConfigDocument> {
    let mut amended = source.clone();
    for app in source.root_keys() {
        if !selection.includes(&app) {
            continue;
        }
        let path = ConfigPath::from_segments([app.as_str(), "image"]);
        let Some(image_str) = source.get_str(&path) else {
            continue;
        };
        let Ok(reference) = ImageReference::parse(image_str) else {
            continue;
        };
        if reference.tag == old_tag {
            amended.set(
                &path,
                Value::String(reference.with_tag(new_tag).to_string()),
            )?;
        }
    }
    Ok(amended)
}

fn review_description(
    request: &PromotionRequest,
    plan: &ChangePlan,
    outcome: &MergeOutcome,
) -> String {
    let mut lines = vec![
        match request.mode {
            TriggerMode::Skip => format!(
                "Direct carry of {} into {}, bypassing normal promotion order.",
                plan.tag, request.target
            ),
            _ => format!(
                "Automated promotion of {} from {} to {}.",
                plan.tag, request.source, request.target
            ),
        },
        String::new(),
        format!("- request: {}", request.id),
        format!("- mode: {}", request.mode.as_str()),
        format!("- {}", outcome.summary()),
    ];
    for skipped in &outcome.skipped {
        lines.push(format!("- skipped: {} ({:?})", skipped.app, skipped.reason));
    }
    for pending in &outcome.pending {
        lines.push(format!(
            "- pending manual follow-up: {}.{} differs between environments and was not copied",
            pending.app, pending.field
        ));
    }
    if let Some(description) = &request.description {
        lines.push(String::new());
        lines.push(description.clone());
    }
    lines.join("\n") + "\n"
}

pub(crate) fn write_staged(root: &Path, relative: &str, content: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
