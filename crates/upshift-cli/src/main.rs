//! Upshift - GitOps environment promotion CLI
//!
//! The `upshift` command moves application releases through the
//! dev -> stage -> prod chain by editing version-controlled configuration
//! branches.
//!
//! ## Commands
//!
//! - `promote`: carry an environment's config (and artifacts) one step up the chain
//! - `rollback`: revert the last commit on an environment branch
//! - `skip`: carry one app's image into two non-adjacent environments
//! - `cleanup`: close stale promotion review requests
//! - `show`: print the effective config of an environment
//! - `config`: structured edits to the layered config tree

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use upshift_config::CueEvaluator;
use upshift_core::{
    ChangeDelivery, ConfigEdit, EngineSettings, Environment, FlowDisposition, PromotionEngine,
    PromotionRequest, SkipRequest,
};
use upshift_gitops::{
    ArgoConfig, ArgoSyncAgent, DockerCliRegistry, GitLabConfig, GitLabHost, PackageRegistryConfig,
    PackageRepository, RepositoryKind,
};
use upshift_merge::AppSelection;

#[derive(Parser)]
#[command(name = "upshift")]
#[command(author = "Upshift Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "GitOps environment promotion engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Promote an environment's config and artifacts to the next environment
    ///
    /// Prints the resulting version tag on stdout.
    Promote {
        /// Source environment (dev or stage)
        source: String,

        /// Target environment (stage or prod)
        target: String,

        /// Promote this image tag instead of the one in the source config
        image_tag: Option<String>,

        /// Mark the run as sync-triggered; stands down when the source head
        /// is a rollback
        #[arg(long)]
        auto: bool,

        /// Carry config only; leave artifact repositories and images alone
        #[arg(long)]
        skip_artifact_promotion: bool,

        /// Promote only the listed config identifiers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only_apps: Vec<String>,

        /// Extra text for the review request description
        #[arg(long)]
        description: Option<String>,
    },

    /// Revert the last commit on an environment branch
    Rollback {
        /// Environment to roll back
        environment: String,

        /// Reason recorded in the revert commit message
        #[arg(long)]
        reason: Option<String>,
    },

    /// Carry one app's image into two non-adjacent environments
    Skip {
        /// First environment (receives the image as well)
        first: String,

        /// Second environment, at least two chain positions later
        second: String,

        /// Config identifier of the app to carry
        #[arg(long)]
        app: String,

        /// Carry this image tag instead of the one in the first environment
        #[arg(long)]
        image: Option<String>,
    },

    /// Close stale promotion review requests against an environment
    ///
    /// Best-effort; always exits 0.
    Cleanup {
        /// Environment whose open promotion review requests are swept
        target: String,
    },

    /// Print the effective config of an environment
    Show {
        environment: String,

        /// List which layer owns each effective value instead
        #[arg(long)]
        owners: bool,
    },

    /// Structured edits to the layered config tree
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Add or update a value
    Set {
        #[command(subcommand)]
        target: SetTarget,
    },

    /// Remove a value
    Unset {
        #[command(subcommand)]
        target: UnsetTarget,
    },
}

#[derive(Subcommand)]
enum SetTarget {
    /// Config-map entry on an app's environment entry
    Map {
        environment: String,
        app: String,
        key: String,
        value: String,

        /// Write the app-layer default instead of the environment entry
        #[arg(long)]
        app_level: bool,

        /// Commit straight to the environment branch, skipping review
        #[arg(long)]
        direct: bool,
    },

    /// Editable per-environment scalar (replicas, debug)
    Field {
        environment: String,
        app: String,
        field: String,
        value: String,

        #[arg(long)]
        direct: bool,
    },

    /// Platform-layer annotation
    Annotation {
        environment: String,
        key: String,
        value: String,

        #[arg(long)]
        direct: bool,
    },
}

#[derive(Subcommand)]
enum UnsetTarget {
    /// Config-map entry on an app's environment entry
    Map {
        environment: String,
        app: String,
        key: String,

        /// Remove the app-layer default instead of the environment entry
        #[arg(long)]
        app_level: bool,

        #[arg(long)]
        direct: bool,
    },

    /// Editable per-environment scalar (replicas, debug)
    Field {
        environment: String,
        app: String,
        field: String,

        #[arg(long)]
        direct: bool,
    },

    /// Platform-layer annotation
    Annotation {
        environment: String,
        key: String,

        #[arg(long)]
        direct: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    upshift_core::init_tracing(cli.json, level);

    let engine = engine_from_env().context("failed to configure backends")?;

    match cli.command {
        Commands::Promote {
            source,
            target,
            image_tag,
            auto,
            skip_artifact_promotion,
            only_apps,
            description,
        } => {
            cmd_promote(
                &engine,
                &source,
                &target,
                image_tag.as_deref(),
                auto,
                skip_artifact_promotion,
                &only_apps,
                description.as_deref(),
            )
            .await
        }
        Commands::Rollback {
            environment,
            reason,
        } => cmd_rollback(&engine, &environment, reason.as_deref()).await,
        Commands::Skip {
            first,
            second,
            app,
            image,
        } => cmd_skip(&engine, &first, &second, &app, image.as_deref()).await,
        Commands::Cleanup { target } => cmd_cleanup(&engine, &target).await,
        Commands::Show {
            environment,
            owners,
        } => cmd_show(&engine, &environment, owners).await,
        Commands::Config { action } => {
            let (environment, edit, direct) = match action {
                ConfigAction::Set { target } => set_edit(target),
                ConfigAction::Unset { target } => unset_edit(target),
            };
            cmd_config_change(&engine, &environment, edit, direct).await
        }
    }
}

/// Wire the production backends from `UPSHIFT_*` environment variables.
fn engine_from_env() -> Result<PromotionEngine> {
    let gitlab = GitLabConfig::from_env().context("GitLab host configuration")?;
    let host = Arc::new(GitLabHost::new(gitlab));

    let argo = ArgoConfig::from_env().context("Argo sync agent configuration")?;
    let sync = Arc::new(ArgoSyncAgent::new(argo));

    let evaluator = Arc::new(CueEvaluator::new());

    let packages = PackageRegistryConfig::from_env().context("package registry configuration")?;
    let snapshots = Arc::new(PackageRepository::new(
        packages.clone(),
        RepositoryKind::Snapshots,
    ));
    let releases = Arc::new(PackageRepository::new(packages, RepositoryKind::Releases));

    let images = Arc::new(DockerCliRegistry::new());

    Ok(PromotionEngine::with_settings(
        host,
        sync,
        evaluator,
        snapshots,
        releases,
        images,
        EngineSettings::from_env(),
    ))
}

#[allow(clippy::too_many_arguments)]
async fn cmd_promote(
    engine: &PromotionEngine,
    source: &str,
    target: &str,
    image_tag: Option<&str>,
    auto: bool,
    skip_artifact_promotion: bool,
    only_apps: &[String],
    description: Option<&str>,
) -> Result<()> {
    let source: Environment = source.parse()?;
    let target: Environment = target.parse()?;

    let mut request = PromotionRequest::new(source, target);
    if let Some(tag) = image_tag {
        request = request.with_image_tag(tag);
    }
    if auto {
        request = request.auto();
    }
    if skip_artifact_promotion {
        request = request.skipping_artifact_promotion();
    }
    if !only_apps.is_empty() {
        request = request.with_apps(AppSelection::only(only_apps.iter().cloned()));
    }
    if let Some(text) = description {
        request = request.with_description(text);
    }

    let report = engine.promote(request).await.context("promotion failed")?;

    match report.disposition {
        FlowDisposition::SuppressedByRollback => {
            eprintln!("promotion suppressed: the {source} head is a rollback");
        }
        FlowDisposition::NoChanges => {
            eprintln!("no changes: {target} already carries the source config");
            if let Some(tag) = &report.tag {
                println!("{tag}");
            }
        }
        FlowDisposition::Completed | FlowDisposition::AlreadyPromoted => {
            if let Some(tag) = &report.tag {
                println!("{tag}");
            }
        }
    }

    Ok(())
}

async fn cmd_rollback(
    engine: &PromotionEngine,
    environment: &str,
    reason: Option<&str>,
) -> Result<()> {
    let environment: Environment = environment.parse()?;
    let report = engine
        .rollback(environment, reason)
        .await
        .context("rollback failed")?;

    println!(
        "Reverted \"{}\" on {} ({})",
        report.reverted_commit,
        report.environment,
        &report.revert_sha[..7.min(report.revert_sha.len())]
    );
    Ok(())
}

async fn cmd_skip(
    engine: &PromotionEngine,
    first: &str,
    second: &str,
    app: &str,
    image: Option<&str>,
) -> Result<()> {
    let first: Environment = first.parse()?;
    let second: Environment = second.parse()?;

    let mut request = SkipRequest::new(first, second, app);
    if let Some(tag) = image {
        request = request.with_image_tag(tag);
    }

    let report = engine
        .skip_environment(&request)
        .await
        .context("skip failed")?;

    println!("{}", report.tag);
    Ok(())
}

async fn cmd_cleanup(engine: &PromotionEngine, target: &str) -> Result<()> {
    let target: Environment = target.parse()?;
    let report = engine.cleanup(target).await;

    println!(
        "Closed {} review request(s), deleted {} branch(es), {} failure(s)",
        report.closed.len(),
        report.deleted_branches.len(),
        report.failures
    );
    Ok(())
}

async fn cmd_show(engine: &PromotionEngine, environment: &str, owners: bool) -> Result<()> {
    let environment: Environment = environment.parse()?;
    let layered = engine
        .effective_config(environment)
        .await
        .context("failed to read config")?;

    if owners {
        for record in layered.records() {
            println!("{} {} {}", record.layer, record.path, record.value);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&layered.effective())?);
    }
    Ok(())
}

async fn cmd_config_change(
    engine: &PromotionEngine,
    environment: &str,
    edit: ConfigEdit,
    direct: bool,
) -> Result<()> {
    let environment: Environment = environment.parse()?;
    let delivery = if direct {
        ChangeDelivery::Direct
    } else {
        ChangeDelivery::ViaReview
    };

    let report = engine
        .apply_config_change(environment, &edit, delivery)
        .await
        .context("config change failed")?;

    if report.applied {
        match &report.commit {
            Some(sha) => println!(
                "Applied: {} ({})",
                report.summary,
                &sha[..7.min(sha.len())]
            ),
            None => println!("Applied: {}", report.summary),
        }
    } else {
        println!("No changes: {} already holds the requested state", environment);
    }
    Ok(())
}

fn set_edit(target: SetTarget) -> (String, ConfigEdit, bool) {
    match target {
        SetTarget::Map {
            environment,
            app,
            key,
            value,
            app_level,
            direct,
        } => {
            let edit = if app_level {
                ConfigEdit::SetAppConfigMapEntry { app, key, value }
            } else {
                ConfigEdit::SetEnvConfigMapEntry { app, key, value }
            };
            (environment, edit, direct)
        }
        SetTarget::Field {
            environment,
            app,
            field,
            value,
            direct,
        } => (environment, ConfigEdit::SetEnvField { app, field, value }, direct),
        SetTarget::Annotation {
            environment,
            key,
            value,
            direct,
        } => (
            environment,
            ConfigEdit::SetPlatformAnnotation { key, value },
            direct,
        ),
    }
}

fn unset_edit(target: UnsetTarget) -> (String, ConfigEdit, bool) {
    match target {
        UnsetTarget::Map {
            environment,
            app,
            key,
            app_level,
            direct,
        } => {
            let edit = if app_level {
                ConfigEdit::UnsetAppConfigMapEntry { app, key }
            } else {
                ConfigEdit::UnsetEnvConfigMapEntry { app, key }
            };
            (environment, edit, direct)
        }
        UnsetTarget::Field {
            environment,
            app,
            field,
            direct,
        } => (environment, ConfigEdit::UnsetEnvField { app, field }, direct),
        UnsetTarget::Annotation {
            environment,
            key,
            direct,
        } => (
            environment,
            ConfigEdit::UnsetPlatformAnnotation { key },
            direct,
        ),
    }
}
