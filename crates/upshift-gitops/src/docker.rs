//! Docker CLI image registry
//!
//! `ImageRegistry` implementation that shells out to the `docker` CLI for
//! pull/tag/push and to `docker manifest inspect` for remote tag existence.
//! Registry credentials come from the ambient docker login, matching how the
//! surrounding CI jobs authenticate.

use std::process::Command;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{GitopsError, GitopsResult};
use crate::traits::{ImageRegistry, ImageReference};

/// Check whether the docker CLI is on PATH.
pub fn is_docker_available() -> bool {
    Command::new("docker")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Image registry client driving the local docker CLI.
#[derive(Debug, Default)]
pub struct DockerCliRegistry;

impl DockerCliRegistry {
    pub fn new() -> Self {
        DockerCliRegistry
    }

    fn run(&self, args: &[&str]) -> GitopsResult<String> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .map_err(|e| GitopsError::Image(format!("failed to run docker: {e}")))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(classify_docker_failure(args[0], &stderr))
    }
}

/// Sort docker CLI failures into the transient/semantic split the retry
/// primitive keys on.
fn classify_docker_failure(verb: &str, stderr: &str) -> GitopsError {
    let lower = stderr.to_lowercase();
    if lower.contains("manifest unknown")
        || lower.contains("not found")
        || lower.contains("does not exist")
    {
        return GitopsError::Image(format!("docker {verb}: image missing: {}", stderr.trim()));
    }
    if lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("tls handshake")
        || lower.contains("temporary failure")
    {
        return GitopsError::Transport(format!("docker {verb}: {}", stderr.trim()));
    }
    if lower.contains("unauthorized") || lower.contains("denied") {
        return GitopsError::Unauthorized(format!("docker {verb}: {}", stderr.trim()));
    }
    GitopsError::Image(format!("docker {verb} failed: {}", stderr.trim()))
}

#[async_trait]
impl ImageRegistry for DockerCliRegistry {
    async fn pull(&self, reference: &ImageReference) -> GitopsResult<()> {
        let image = reference.to_string();
        debug!(image = %image, "docker pull");
        self.run(&["pull", &image]).map(|_| ()).map_err(|e| match e {
            GitopsError::Image(msg) if msg.contains("image missing") => {
                GitopsError::ImageNotFound { reference: image }
            }
            other => other,
        })
    }

    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> GitopsResult<()> {
        debug!(source = %source, target = %target, "docker tag");
        self.run(&["tag", &source.to_string(), &target.to_string()])
            .map(|_| ())
    }

    async fn push(&self, reference: &ImageReference) -> GitopsResult<()> {
        debug!(image = %reference, "docker push");
        self.run(&["push", &reference.to_string()]).map(|_| ())
    }

    async fn tag_exists(&self, reference: &ImageReference) -> GitopsResult<bool> {
        match self.run(&["manifest", "inspect", &reference.to_string()]) {
            Ok(_) => Ok(true),
            Err(GitopsError::Image(msg)) if msg.contains("image missing") => Ok(false),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_manifest() {
        let err = classify_docker_failure("pull", "manifest unknown: manifest unknown");
        assert!(matches!(err, GitopsError::Image(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_network_failure_as_transient() {
        let err = classify_docker_failure(
            "push",
            "Get \"https://registry/v2/\": net/http: TLS handshake timeout",
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_denied_as_unauthorized() {
        let err = classify_docker_failure("push", "denied: requested access to the resource is denied");
        assert!(matches!(err, GitopsError::Unauthorized(_)));
    }
}
