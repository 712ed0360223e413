//! Engine tuning knobs.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::Environment;
use crate::retry::{PollPolicy, RetryPolicy};

const BRANCH_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Tunables for the promotion engine. Every knob has a sensible default;
/// `from_env` overrides individual knobs from `UPSHIFT_*` variables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Commit messages containing this marker suppress auto-promotion.
    pub rollback_marker: String,
    /// Work branches for promotions are named `<prefix>/<src>-to-<tgt>-<ts>`.
    pub promote_branch_prefix: String,
    /// Work branches for structured config changes are named
    /// `<prefix>/<env>-<ts>`.
    pub config_branch_prefix: String,
    /// Polling for CI verdicts on review requests.
    pub ci_poll: PollPolicy,
    /// Polling for sync agent convergence after merge.
    pub sync_poll: PollPolicy,
    /// Retry for transient host failures.
    pub retry: RetryPolicy,
    /// How many times a review request is rebuilt after the target branch
    /// moves underneath it before the flow gives up.
    pub max_reconcile_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            rollback_marker: "[no-promote]".to_string(),
            promote_branch_prefix: "promote".to_string(),
            config_branch_prefix: "config".to_string(),
            ci_poll: PollPolicy {
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(900),
            },
            sync_poll: PollPolicy {
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(600),
            },
            retry: RetryPolicy::default(),
            max_reconcile_attempts: 2,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `UPSHIFT_*` environment variables where set.
    pub fn from_env() -> Self {
        let mut settings = EngineSettings::default();
        if let Ok(marker) = std::env::var("UPSHIFT_ROLLBACK_MARKER") {
            settings.rollback_marker = marker;
        }
        if let Some(interval) = env_secs("UPSHIFT_CI_POLL_INTERVAL_SECS") {
            settings.ci_poll.interval = interval;
        }
        if let Some(timeout) = env_secs("UPSHIFT_CI_POLL_TIMEOUT_SECS") {
            settings.ci_poll.timeout = timeout;
        }
        if let Some(interval) = env_secs("UPSHIFT_SYNC_POLL_INTERVAL_SECS") {
            settings.sync_poll.interval = interval;
        }
        if let Some(timeout) = env_secs("UPSHIFT_SYNC_POLL_TIMEOUT_SECS") {
            settings.sync_poll.timeout = timeout;
        }
        if let Some(attempts) = env_u32("UPSHIFT_RETRY_MAX_ATTEMPTS") {
            settings.retry.max_attempts = attempts;
        }
        settings
    }

    /// UTC-timestamped work branch name for a promotion.
    pub fn promote_branch(
        &self,
        source: Environment,
        target: Environment,
        at: DateTime<Utc>,
    ) -> String {
        format!(
            "{}/{}-to-{}-{}",
            self.promote_branch_prefix,
            source,
            target,
            at.format(BRANCH_TIMESTAMP_FORMAT)
        )
    }

    /// UTC-timestamped work branch name for a structured config change.
    pub fn config_branch(&self, environment: Environment, at: DateTime<Utc>) -> String {
        format!(
            "{}/{}-{}",
            self.config_branch_prefix,
            environment,
            at.format(BRANCH_TIMESTAMP_FORMAT)
        )
    }

    /// Whether a branch was created by a promotion flow.
    pub fn is_promote_branch(&self, branch: &str) -> bool {
        branch.starts_with(&format!("{}/", self.promote_branch_prefix))
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_secs)
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_branch_names_carry_utc_timestamp() {
        let settings = EngineSettings::default();
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            settings.promote_branch(Environment::Dev, Environment::Stage, at),
            "promote/dev-to-stage-20260314T092653Z"
        );
        assert_eq!(
            settings.config_branch(Environment::Prod, at),
            "config/prod-20260314T092653Z"
        );
    }

    #[test]
    fn test_promote_branch_detection() {
        let settings = EngineSettings::default();
        assert!(settings.is_promote_branch("promote/dev-to-stage-20260314T092653Z"));
        assert!(!settings.is_promote_branch("config/prod-20260314T092653Z"));
        assert!(!settings.is_promote_branch("env/stage"));
        assert!(!settings.is_promote_branch("promoted/other"));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("UPSHIFT_CI_POLL_TIMEOUT_SECS", "120");
        std::env::set_var("UPSHIFT_RETRY_MAX_ATTEMPTS", "5");
        let settings = EngineSettings::from_env();
        assert_eq!(settings.ci_poll.timeout, Duration::from_secs(120));
        assert_eq!(settings.retry.max_attempts, 5);
        // untouched knobs keep their defaults
        assert_eq!(settings.rollback_marker, "[no-promote]");
        std::env::remove_var("UPSHIFT_CI_POLL_TIMEOUT_SECS");
        std::env::remove_var("UPSHIFT_RETRY_MAX_ATTEMPTS");
    }
}
