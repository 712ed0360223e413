use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use upshift_config::fakes::StaticEvaluator;
use upshift_config::{ConfigDocument, ConfigPath};
use upshift_core::{
    EngineSettings, Environment, FlowDisposition, PollPolicy, PromoteError, PromotionEngine,
    PromotionRequest, RetryPolicy, SkipRequest,
};
use upshift_gitops::fakes::{
    MemoryArtifactRepository, MemoryImageRegistry, MemoryReviewHost, MemorySyncAgent,
};
use upshift_gitops::{
    ArtifactRepository, GitopsError, ImageReference, NewReviewRequest, RepositoryKind,
    ReviewRequestHost, ReviewRequestState,
};
use upshift_merge::{AppSelection, SkipReason};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const DEV_IMAGE: &str = "registry.example.io/apps/example-app:1.2.0-SNAPSHOT-abcdef1";
const STAGE_IMAGE: &str = "registry.example.io/apps/example-app:1.1.0-rc2-9876543";

struct Harness {
    host: Arc<MemoryReviewHost>,
    sync: Arc<MemorySyncAgent>,
    snapshots: Arc<MemoryArtifactRepository>,
    releases: Arc<MemoryArtifactRepository>,
    images: Arc<MemoryImageRegistry>,
    engine: Arc<PromotionEngine>,
}

fn fast_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.ci_poll = PollPolicy {
        interval: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    };
    settings.sync_poll = PollPolicy {
        interval: Duration::from_millis(5),
        timeout: Duration::from_secs(2),
    };
    settings.retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };
    settings
}

fn harness() -> Harness {
    let host = Arc::new(MemoryReviewHost::new());
    let sync = Arc::new(MemorySyncAgent::new());
    let evaluator = Arc::new(StaticEvaluator::new());
    let snapshots = Arc::new(MemoryArtifactRepository::new(RepositoryKind::Snapshots));
    let releases = Arc::new(MemoryArtifactRepository::new(RepositoryKind::Releases));
    let images = Arc::new(MemoryImageRegistry::new());
    evaluator.set(
        "manifests",
        json!({
            "example-app": {"kind": "Deployment", "metadata": {"name": "example-app"}}
        }),
    );
    let engine = Arc::new(PromotionEngine::with_settings(
        host.clone(),
        sync.clone(),
        evaluator.clone(),
        snapshots.clone(),
        releases.clone(),
        images.clone(),
        fast_settings(),
    ));
    Harness {
        host,
        sync,
        snapshots,
        releases,
        images,
        engine,
    }
}

fn dev_doc() -> String {
    json!({
        "exampleApp": {
            "image": DEV_IMAGE,
            "namespace": "apps-dev",
            "replicas": 2,
            "debug": true
        }
    })
    .to_string()
}

fn stage_doc() -> String {
    json!({
        "exampleApp": {
            "image": STAGE_IMAGE,
            "namespace": "apps-stage",
            "replicas": 4,
            "debug": false
        }
    })
    .to_string()
}

fn prod_doc() -> String {
    json!({
        "exampleApp": {
            "image": "registry.example.io/apps/example-app:1.0.2",
            "namespace": "apps-prod",
            "replicas": 8,
            "debug": false
        }
    })
    .to_string()
}

fn apps_doc() -> String {
    json!({"exampleApp": {"deployableName": "example-app"}}).to_string()
}

impl Harness {
    fn seed_env(&self, branch: &str, doc: &str) {
        let apps = apps_doc();
        self.host.seed_branch(
            branch,
            &[
                ("config/environment.json", doc),
                ("config/apps.json", apps.as_str()),
                ("config/platform.json", "{}"),
            ],
        );
    }

    fn seed_chain(&self) {
        self.seed_env("env/dev", &dev_doc());
        self.seed_env("env/stage", &stage_doc());
        self.seed_env("env/prod", &prod_doc());
        self.snapshots.seed("example-app", "1.2.0-SNAPSHOT-abcdef1");
        self.releases.seed("example-app", "1.1.0-rc2-9876543");
    }
}

fn env_config(host: &MemoryReviewHost, branch: &str) -> ConfigDocument {
    let files = host.branch_files(branch);
    let content = files
        .get("config/environment.json")
        .expect("environment config present");
    ConfigDocument::parse(content).expect("environment config parses")
}

fn path(expr: &str) -> ConfigPath {
    ConfigPath::parse(expr).expect("config path")
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rollback_reverts_the_head_commit_with_a_suppression_marker() {
    let h = harness();
    h.seed_chain();
    let original = env_config(&h.host, "env/stage");

    let mut edited = env_config(&h.host, "env/stage");
    edited
        .set(&path("exampleApp.replicas"), json!(6))
        .expect("edit replicas");
    h.host
        .update_file(
            "config/environment.json",
            "env/stage",
            &edited.to_pretty_string(),
            "ops: raise replicas to 6",
        )
        .await
        .expect("second commit");

    let report = h
        .engine
        .rollback(Environment::Stage, Some("error rate spike"))
        .await
        .expect("rollback succeeds");

    assert_eq!(report.environment, Environment::Stage);
    assert_eq!(report.reverted_commit, "ops: raise replicas to 6");
    assert_eq!(report.reason.as_deref(), Some("error rate spike"));
    assert_eq!(h.host.head_sha("env/stage"), Some(report.revert_sha.clone()));

    // the revert commit carries the trigger-suppression marker and the reason
    let messages = h.host.commit_messages("env/stage");
    let head_message = messages.last().expect("head message");
    assert!(head_message.starts_with("Revert \"ops: raise replicas to 6\""));
    assert!(head_message.contains("[no-promote] rollback of stage: error rate spike"));

    // file state is back to what it was before the bad commit
    let restored = env_config(&h.host, "env/stage");
    assert_eq!(restored.as_value(), original.as_value());
}

#[tokio::test]
async fn rollback_with_no_prior_commit_fails() {
    let h = harness();
    h.seed_chain();

    let err = h
        .engine
        .rollback(Environment::Stage, None)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            PromoteError::Gitops(GitopsError::NothingToRevert { .. })
        ),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn auto_promotion_stands_down_after_rollback() {
    let h = harness();
    h.seed_chain();
    h.images
        .seed_remote(&ImageReference::parse(STAGE_IMAGE).expect("stage image"));
    h.sync.track("example-app", h.host.clone(), "env/prod");

    // a bad commit lands on stage and gets rolled back
    let mut edited = env_config(&h.host, "env/stage");
    edited
        .set(&path("exampleApp.debug"), json!(true))
        .expect("edit debug");
    h.host
        .update_file(
            "config/environment.json",
            "env/stage",
            &edited.to_pretty_string(),
            "ops: enable debug",
        )
        .await
        .expect("second commit");
    h.engine
        .rollback(Environment::Stage, None)
        .await
        .expect("rollback succeeds");

    // the sync-triggered promotion must not carry the rolled-back state on
    let report = h
        .engine
        .promote(PromotionRequest::new(Environment::Stage, Environment::Prod).auto())
        .await
        .expect("auto promotion returns a report");

    assert_eq!(report.disposition, FlowDisposition::SuppressedByRollback);
    assert!(report.tag.is_none());
    assert!(report.review_request.is_none());
    assert!(h
        .host
        .list_open_review_requests("env/prod")
        .await
        .expect("list")
        .is_empty());
    assert_eq!(h.host.commit_messages("env/prod").len(), 1);

    // an operator-triggered promotion is not suppressed
    let manual = h
        .engine
        .promote(PromotionRequest::new(Environment::Stage, Environment::Prod))
        .await
        .expect("manual promotion succeeds");
    assert_eq!(manual.disposition, FlowDisposition::Completed);
    assert_eq!(manual.tag.as_deref(), Some("1.1.0"));
}

// ---------------------------------------------------------------------------
// Selection isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cherry_pick_leaves_unselected_apps_untouched() {
    let h = harness();
    let dev = json!({
        "exampleApp": {
            "image": DEV_IMAGE,
            "namespace": "apps-dev"
        },
        "otherApp": {
            "image": "registry.example.io/apps/other-app:2.0.1-SNAPSHOT-aaaa111",
            "namespace": "apps-dev"
        }
    })
    .to_string();
    let stage = json!({
        "exampleApp": {
            "image": STAGE_IMAGE,
            "namespace": "apps-stage"
        },
        "otherApp": {
            "image": "registry.example.io/apps/other-app:1.9.0-rc4-bbbb222",
            "namespace": "apps-stage"
        }
    })
    .to_string();
    let apps = json!({
        "exampleApp": {"deployableName": "example-app"},
        "otherApp": {"deployableName": "other-app"}
    })
    .to_string();
    h.host.seed_branch(
        "env/dev",
        &[
            ("config/environment.json", dev.as_str()),
            ("config/apps.json", apps.as_str()),
            ("config/platform.json", "{}"),
        ],
    );
    h.host.seed_branch(
        "env/stage",
        &[
            ("config/environment.json", stage.as_str()),
            ("config/apps.json", apps.as_str()),
            ("config/platform.json", "{}"),
        ],
    );
    h.snapshots.seed("example-app", "1.2.0-SNAPSHOT-abcdef1");
    h.images
        .seed_remote(&ImageReference::parse(DEV_IMAGE).expect("dev image"));
    h.sync.track("example-app", h.host.clone(), "env/stage");

    let report = h
        .engine
        .promote(
            PromotionRequest::new(Environment::Dev, Environment::Stage)
                .with_apps(AppSelection::only(["exampleApp"])),
        )
        .await
        .expect("promotion succeeds");

    assert_eq!(report.disposition, FlowDisposition::Completed);
    let outcome = report.merge.expect("merge outcome");
    assert!(outcome
        .skipped
        .iter()
        .any(|s| s.app == "otherApp" && s.reason == SkipReason::NotSelected));

    let after = env_config(&h.host, "env/stage");
    assert_eq!(
        after.get_str(&path("exampleApp.image")),
        Some("registry.example.io/apps/example-app:1.2.0-rc1-abcdef1")
    );
    // the unselected app keeps its byte-for-byte stage state
    assert_eq!(
        after.get(&path("otherApp")),
        ConfigDocument::parse(&stage)
            .expect("stage doc")
            .get(&path("otherApp"))
    );
}

// ---------------------------------------------------------------------------
// Environment skipping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_carries_an_image_past_the_intermediate_environment() {
    let h = harness();
    h.seed_chain();
    h.sync.track("example-app", h.host.clone(), "env/prod");
    let stage_head = h.host.head_sha("env/stage");

    let report = h
        .engine
        .skip_environment(&SkipRequest::new(
            Environment::Dev,
            Environment::Prod,
            "exampleApp",
        ))
        .await
        .expect("skip succeeds");

    assert_eq!(report.app, "exampleApp");
    assert_eq!(report.tag, "1.2.0-SNAPSHOT-abcdef1");
    assert_eq!(report.reports.len(), 2);
    // dev already carries the image, so the first leg detects a no-op
    assert_eq!(report.reports[0].disposition, FlowDisposition::NoChanges);
    assert_eq!(report.reports[1].disposition, FlowDisposition::Completed);

    // the tag is carried verbatim, with no version progression
    let prod = env_config(&h.host, "env/prod");
    assert_eq!(prod.get_str(&path("exampleApp.image")), Some(DEV_IMAGE));
    // target-owned fields on prod survive
    assert_eq!(prod.get(&path("exampleApp.replicas")), Some(&json!(8)));

    // the intermediate environment is untouched and no artifacts moved
    assert_eq!(h.host.head_sha("env/stage"), stage_head);
    assert!(h.images.operations().is_empty());
    assert_eq!(
        h.releases.versions("example-app").await.expect("versions"),
        vec!["1.1.0-rc2-9876543".to_string()]
    );
}

#[tokio::test]
async fn skip_requires_a_gap_of_at_least_two() {
    let h = harness();
    h.seed_chain();

    let err = h
        .engine
        .skip_environment(&SkipRequest::new(
            Environment::Dev,
            Environment::Stage,
            "exampleApp",
        ))
        .await
        .unwrap_err();

    assert!(
        matches!(err, PromoteError::SkipNotApplicable { .. }),
        "unexpected error: {err:?}"
    );
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_sweeps_stale_promotion_review_requests() {
    let h = harness();
    h.seed_chain();
    let stage = stage_doc();
    h.host.seed_branch(
        "promote/dev-to-stage-20250102T000000Z",
        &[("config/environment.json", stage.as_str())],
    );
    h.host
        .seed_branch("feature/tune", &[("config/environment.json", stage.as_str())]);
    let stale = h
        .host
        .create_review_request(NewReviewRequest {
            source_branch: "promote/dev-to-stage-20250102T000000Z".to_string(),
            target_branch: "env/stage".to_string(),
            title: "Promote dev -> stage: 1.1.9-rc1-0000000".to_string(),
            description: String::new(),
        })
        .await
        .expect("stale review request");
    let feature = h
        .host
        .create_review_request(NewReviewRequest {
            source_branch: "feature/tune".to_string(),
            target_branch: "env/stage".to_string(),
            title: "Tune resource limits".to_string(),
            description: String::new(),
        })
        .await
        .expect("feature review request");

    let report = h.engine.cleanup(Environment::Stage).await;

    assert_eq!(report.closed, vec![stale.id]);
    assert_eq!(
        report.deleted_branches,
        vec!["promote/dev-to-stage-20250102T000000Z".to_string()]
    );
    assert_eq!(report.failures, 0);
    assert!(!h.host.branch_exists("promote/dev-to-stage-20250102T000000Z"));
    assert!(h
        .host
        .annotations(stale.id)
        .iter()
        .any(|note| note.contains("closed by cleanup")));

    let feature_after = h
        .host
        .get_review_request(feature.id)
        .await
        .expect("feature lookup");
    assert_eq!(feature_after.state, ReviewRequestState::Open);
}
