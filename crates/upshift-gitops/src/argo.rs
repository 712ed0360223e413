//! Argo CD sync agent client
//!
//! Read-only `SyncAgent` implementation over the Argo CD application API.
//! The engine never drives syncs; it watches `status.sync` / `status.health`
//! until the post-merge revision lands healthy.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GitopsError, GitopsResult};
use crate::traits::{AppSyncStatus, HealthState, SyncAgent, SyncState};

/// Argo CD connection configuration.
#[derive(Debug, Clone)]
pub struct ArgoConfig {
    /// API base URL, e.g. `https://argocd.example.com`
    pub base_url: String,
    /// Bearer token; Argo instances rarely allow anonymous reads
    pub token: Option<String>,
}

impl ArgoConfig {
    pub fn new(base_url: &str) -> Self {
        ArgoConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Read `UPSHIFT_ARGO_URL` and `UPSHIFT_ARGO_TOKEN`.
    pub fn from_env() -> GitopsResult<Self> {
        let base_url = std::env::var("UPSHIFT_ARGO_URL")
            .map_err(|_| GitopsError::MissingCredentials("UPSHIFT_ARGO_URL".into()))?;
        let mut config = ArgoConfig::new(&base_url);
        config.token = std::env::var("UPSHIFT_ARGO_TOKEN").ok();
        Ok(config)
    }
}

/// Sync agent backed by an Argo CD server.
pub struct ArgoSyncAgent {
    config: ArgoConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApplicationResponse {
    status: ApplicationStatus,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApplicationStatus {
    sync: SyncSection,
    health: HealthSection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SyncSection {
    status: String,
    revision: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HealthSection {
    status: String,
}

fn sync_state(raw: &str) -> SyncState {
    match raw {
        "Synced" => SyncState::Synced,
        "OutOfSync" => SyncState::OutOfSync,
        _ => SyncState::Unknown,
    }
}

fn health_state(raw: &str) -> HealthState {
    match raw {
        "Healthy" => HealthState::Healthy,
        "Progressing" => HealthState::Progressing,
        "Degraded" => HealthState::Degraded,
        "Suspended" => HealthState::Suspended,
        "Missing" => HealthState::Missing,
        _ => HealthState::Unknown,
    }
}

impl ArgoSyncAgent {
    pub fn new(config: ArgoConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("upshift/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        ArgoSyncAgent { config, http }
    }

    async fn application(&self, app: &str) -> GitopsResult<ApplicationResponse> {
        let url = format!("{}/api/v1/applications/{app}", self.config.base_url);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            let app: ApplicationResponse = response.json().await?;
            return Ok(app);
        }
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(GitopsError::Unauthorized(body)),
            code if status.is_server_error() => Err(GitopsError::Server { status: code, body }),
            code => Err(GitopsError::UnexpectedStatus { status: code, body }),
        }
    }
}

#[async_trait]
impl SyncAgent for ArgoSyncAgent {
    async fn revision(&self, app: &str) -> GitopsResult<String> {
        Ok(self.application(app).await?.status.sync.revision)
    }

    async fn status(&self, app: &str) -> GitopsResult<AppSyncStatus> {
        let status = self.application(app).await?.status;
        debug!(
            app,
            sync = %status.sync.status,
            health = %status.health.status,
            "sync agent status"
        );
        Ok(AppSyncStatus {
            revision: status.sync.revision,
            sync: sync_state(&status.sync.status),
            health: health_state(&status.health.status),
        })
    }
}
