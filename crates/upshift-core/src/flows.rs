//! Flows beside the main promotion: rollback, cleanup, skip-environment.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn, Instrument};
use upshift_config::{ConfigDocument, ConfigPath};
use upshift_gitops::ImageReference;
use upshift_merge::{AppSelection, MergeError, APP_CONFIG_PATH, ENVIRONMENT_CONFIG_PATH};

use crate::domain::{
    AppRegistry, CleanupReport, Environment, FlowStep, PromoteError, PromotionRequest, Result,
    RollbackReport, SkipReport, SkipRequest, StepRecord, TriggerMode,
};
use crate::obs;
use crate::orchestrator::{ChangePlan, PromotionEngine};

impl PromotionEngine {
    /// Revert the most recent commit on an environment branch.
    ///
    /// The revert commit carries the rollback marker in its message, which
    /// suppresses any auto-promotion that would otherwise carry the reverted
    /// state onward. Fails when the branch has no revertable commit.
    pub async fn rollback(
        &self,
        environment: Environment,
        reason: Option<&str>,
    ) -> Result<RollbackReport> {
        let branch = environment.branch();
        let head = self
            .settings
            .retry
            .run("head read", || self.host.last_commit(&branch))
            .await?;
        let first_line = head.message.lines().next().unwrap_or("").trim().to_string();

        let mut message = format!("Revert \"{first_line}\"\n\n");
        message.push_str(&format!(
            "{} rollback of {environment}",
            self.settings.rollback_marker
        ));
        if let Some(reason) = reason {
            message.push_str(&format!(": {reason}"));
        }
        let revert = self.host.revert_last_commit(&branch, &message).await?;
        info!(
            event = "rollback.completed",
            environment = %environment,
            reverted = %first_line,
            revert_sha = %revert.sha,
        );

        Ok(RollbackReport {
            environment,
            reverted_commit: first_line,
            revert_sha: revert.sha,
            reason: reason.map(String::from),
            completed_at: Utc::now(),
        })
    }

    /// Close stale promotion review requests against an environment branch
    /// and delete their work branches.
    ///
    /// Only review requests whose source branch carries the promotion prefix
    /// are touched. Nothing here is fatal; failures are counted so the
    /// caller can report them without aborting.
    pub async fn cleanup(&self, target: Environment) -> CleanupReport {
        let branch = target.branch();
        let mut report = CleanupReport::default();

        let open = match self.host.list_open_review_requests(&branch).await {
            Ok(open) => open,
            Err(err) => {
                warn!(event = "cleanup.list_failed", target = %target, error = %err);
                report.failures += 1;
                return report;
            }
        };

        for review in open {
            if !self.settings.is_promote_branch(&review.source_branch) {
                continue;
            }
            match self
                .host
                .close_review_request(review.id, Some("closed by cleanup"))
                .await
            {
                Ok(()) => report.closed.push(review.id),
                Err(err) => {
                    warn!(event = "cleanup.close_failed", review_request = %review.id, error = %err);
                    report.failures += 1;
                    continue;
                }
            }
            match self.host.delete_branch(&review.source_branch).await {
                Ok(()) => report.deleted_branches.push(review.source_branch),
                Err(err) => {
                    warn!(event = "cleanup.branch_delete_failed", branch = %review.source_branch, error = %err);
                    report.failures += 1;
                }
            }
        }
        info!(
            event = "cleanup.completed",
            target = %target,
            closed = report.closed.len(),
            deleted_branches = report.deleted_branches.len(),
            failures = report.failures,
        );
        report
    }

    /// Carry one app's image into two non-adjacent environments, leaving
    /// everything between untouched.
    ///
    /// Runs the config-merge pipeline once per named environment, in chain
    /// order, with a synthetic single-app source. No artifacts move and no
    /// version progression happens; the tag is carried verbatim. The first
    /// sub-flow failing aborts the whole request.
    pub async fn skip_environment(&self, request: &SkipRequest) -> Result<SkipReport> {
        let span = obs::flow_span(request.id);
        async move {
            if request.second.position() < request.first.position() + 2 {
                return Err(PromoteError::SkipNotApplicable {
                    first: request.first,
                    second: request.second,
                });
            }

            let first_branch = request.first.branch();
            let source_doc = ConfigDocument::parse(
                &self
                    .fetch_file(ENVIRONMENT_CONFIG_PATH, &first_branch)
                    .await?,
            )?;
            let registry = AppRegistry::from_document(&ConfigDocument::parse(
                &self.fetch_lenient(APP_CONFIG_PATH, &first_branch).await?,
            )?);

            let image_path = ConfigPath::from_segments([request.app.as_str(), "image"]);
            let image_str = source_doc.get_str(&image_path).ok_or_else(|| {
                PromoteError::Merge(MergeError::MissingImage {
                    app: request.app.clone(),
                })
            })?;
            let base_image = ImageReference::parse(image_str)?;
            let carried = match &request.image_tag {
                Some(tag) => base_image.with_tag(tag),
                None => base_image,
            };
            let tag = carried.tag.clone();

            let mut synthetic = ConfigDocument::empty();
            synthetic.set(&image_path, Value::String(carried.to_string()))?;

            let mut reports = Vec::new();
            for target in [request.first, request.second] {
                obs::emit_flow_started(request.id, request.first, target, "skip");
                let sub_request = self.skip_sub_request(request, target, &tag);
                let plan = ChangePlan {
                    registry: registry.clone(),
                    source: synthetic.clone(),
                    tag: tag.clone(),
                    artifacts: None,
                };
                let steps = vec![StepRecord::now(
                    FlowStep::Start,
                    format!("skip carry of {tag} into {target}"),
                )];
                let report = self.run_change(&sub_request, &plan, steps).await?;
                reports.push(report);
            }

            Ok(SkipReport {
                request_id: request.id,
                app: request.app.clone(),
                tag,
                reports,
                completed_at: Utc::now(),
            })
        }
        .instrument(span)
        .await
    }

    fn skip_sub_request(
        &self,
        request: &SkipRequest,
        target: Environment,
        tag: &str,
    ) -> PromotionRequest {
        let mut sub = PromotionRequest::new(request.first, target)
            .with_apps(AppSelection::only([request.app.clone()]))
            .with_mode(TriggerMode::Skip)
            .with_image_tag(tag)
            .skipping_artifact_promotion();
        // both sub-flows share the skip request's identity in logs
        sub.id = request.id;
        sub.requested_at = request.requested_at;
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_gap_must_be_at_least_two() {
        assert!(Environment::Prod.position() >= Environment::Dev.position() + 2);
        assert!(Environment::Stage.position() < Environment::Dev.position() + 2);
    }
}
