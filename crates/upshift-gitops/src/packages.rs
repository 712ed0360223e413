//! Generic package registry artifact repository
//!
//! `ArtifactRepository` implementation over a GitLab generic package registry.
//! Snapshot and release instances share one underlying registry; the version
//! grammar keeps them disjoint (snapshot versions carry `-SNAPSHOT-`), and
//! `versions` filters accordingly so the two instances never see each other's
//! entries.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GitopsError, GitopsResult};
use crate::traits::{ArtifactRepository, RepositoryKind};

/// Package registry configuration.
#[derive(Debug, Clone)]
pub struct PackageRegistryConfig {
    /// Instance base URL, e.g. `https://gitlab.example.com`
    pub base_url: String,
    /// Project path or numeric id hosting the registry
    pub project: String,
    /// Token; required for download and publish
    pub token: Option<String>,
    /// File extension for package payloads (`jar` for the JVM services here)
    pub packaging: String,
}

impl PackageRegistryConfig {
    pub fn new(base_url: &str, project: &str) -> Self {
        PackageRegistryConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token: None,
            packaging: "jar".to_string(),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Read `UPSHIFT_REGISTRY_URL`, `UPSHIFT_REGISTRY_PROJECT`,
    /// `UPSHIFT_REGISTRY_TOKEN` (URL/project default to the GitLab host vars).
    pub fn from_env() -> GitopsResult<Self> {
        let base_url = std::env::var("UPSHIFT_REGISTRY_URL")
            .or_else(|_| std::env::var("UPSHIFT_GITLAB_URL"))
            .map_err(|_| GitopsError::MissingCredentials("UPSHIFT_REGISTRY_URL".into()))?;
        let project = std::env::var("UPSHIFT_REGISTRY_PROJECT")
            .or_else(|_| std::env::var("UPSHIFT_GITLAB_PROJECT"))
            .map_err(|_| GitopsError::MissingCredentials("UPSHIFT_REGISTRY_PROJECT".into()))?;
        let mut config = PackageRegistryConfig::new(&base_url, &project);
        config.token = std::env::var("UPSHIFT_REGISTRY_TOKEN")
            .or_else(|_| std::env::var("UPSHIFT_GITLAB_TOKEN"))
            .ok();
        Ok(config)
    }
}

/// One kind-scoped view of the package registry.
pub struct PackageRepository {
    config: PackageRegistryConfig,
    kind: RepositoryKind,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    name: String,
    version: String,
}

fn version_matches_kind(version: &str, kind: RepositoryKind) -> bool {
    match kind {
        RepositoryKind::Snapshots => version.contains("-SNAPSHOT-"),
        RepositoryKind::Releases => !version.contains("-SNAPSHOT-"),
    }
}

impl PackageRepository {
    pub fn new(config: PackageRegistryConfig, kind: RepositoryKind) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("upshift/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        PackageRepository { config, kind, http }
    }

    fn project(&self) -> String {
        self.config.project.replace('/', "%2F")
    }

    fn file_url(&self, name: &str, version: &str) -> String {
        format!(
            "{}/api/v4/projects/{}/packages/generic/{}/{}/{}-{}.{}",
            self.config.base_url,
            self.project(),
            name,
            version,
            name,
            version,
            self.config.packaging,
        )
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.header("PRIVATE-TOKEN", token),
            None => req,
        }
    }

    fn require_token(&self) -> GitopsResult<()> {
        if self.config.token.as_deref().unwrap_or("").is_empty() {
            return Err(GitopsError::MissingCredentials(
                "UPSHIFT_REGISTRY_TOKEN".into(),
            ));
        }
        Ok(())
    }

    async fn check(&self, response: reqwest::Response) -> GitopsResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
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
impl ArtifactRepository for PackageRepository {
    fn kind(&self) -> RepositoryKind {
        self.kind
    }

    async fn download(&self, name: &str, version: &str) -> GitopsResult<Vec<u8>> {
        self.require_token()?;
        let url = self.file_url(name, version);
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(GitopsError::ArtifactNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        let bytes = self.check(response).await?.bytes().await?;
        debug!(name, version, size = bytes.len(), "downloaded artifact");
        Ok(bytes.to_vec())
    }

    async fn publish(&self, name: &str, version: &str, data: &[u8]) -> GitopsResult<()> {
        self.require_token()?;
        if self.exists(name, version).await? {
            return Err(GitopsError::AlreadyPublished {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        let url = self.file_url(name, version);
        let response = self
            .authed(self.http.put(&url))
            .body(data.to_vec())
            .send()
            .await?;
        self.check(response).await?;
        debug!(name, version, size = data.len(), "published artifact");
        Ok(())
    }

    async fn exists(&self, name: &str, version: &str) -> GitopsResult<bool> {
        let url = self.file_url(name, version);
        let response = self.authed(self.http.head(&url)).send().await?;
        match response.status().as_u16() {
            404 => Ok(false),
            _ => {
                self.check(response).await?;
                Ok(true)
            }
        }
    }

    async fn versions(&self, name: &str) -> GitopsResult<Vec<String>> {
        let url = format!(
            "{}/api/v4/projects/{}/packages?package_name={}&per_page=100",
            self.config.base_url,
            self.project(),
            name,
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        let packages: Vec<PackageEntry> = self.check(response).await?.json().await?;
        // the package_name filter is a substring match server-side
        let mut versions: Vec<String> = packages
            .into_iter()
            .filter(|p| p.name == name && version_matches_kind(&p.version, self.kind))
            .map(|p| p.version)
            .collect();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_layout() {
        let repo = PackageRepository::new(
            PackageRegistryConfig::new("https://gitlab.example.com", "platform/config"),
            RepositoryKind::Releases,
        );
        assert_eq!(
            repo.file_url("example-app", "1.2.0-rc1-abcdef1"),
            "https://gitlab.example.com/api/v4/projects/platform%2Fconfig/packages/generic/example-app/1.2.0-rc1-abcdef1/example-app-1.2.0-rc1-abcdef1.jar"
        );
    }

    #[test]
    fn test_version_kind_filter() {
        assert!(version_matches_kind(
            "1.2.0-SNAPSHOT-abcdef1",
            RepositoryKind::Snapshots
        ));
        assert!(!version_matches_kind(
            "1.2.0-SNAPSHOT-abcdef1",
            RepositoryKind::Releases
        ));
        assert!(version_matches_kind("1.2.0-rc1-abcdef1", RepositoryKind::Releases));
        assert!(version_matches_kind("1.2.0", RepositoryKind::Releases));
    }

    #[test]
    fn test_publish_requires_token() {
        let repo = PackageRepository::new(
            PackageRegistryConfig::new("https://gitlab.example.com", "p/c"),
            RepositoryKind::Snapshots,
        );
        assert!(matches!(
            repo.require_token(),
            Err(GitopsError::MissingCredentials(_))
        ));
    }
}
