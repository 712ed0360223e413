//! GitLab-backed review-request host
//!
//! Implements `ReviewRequestHost` against the GitLab REST API (v4): branches,
//! repository files, commits, and merge requests. Merge requests play the
//! review-request role; the merge request's head pipeline supplies the CI
//! verdict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{GitopsError, GitopsResult};
use crate::traits::*;

/// GitLab connection configuration.
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    /// Instance base URL, e.g. `https://gitlab.example.com`
    pub base_url: String,
    /// Project path (`group/config-repo`) or numeric id
    pub project: String,
    /// Personal/project access token; required for all mutating calls
    pub token: Option<String>,
}

impl GitLabConfig {
    pub fn new(base_url: &str, project: &str) -> Self {
        GitLabConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Read `UPSHIFT_GITLAB_URL`, `UPSHIFT_GITLAB_PROJECT`,
    /// `UPSHIFT_GITLAB_TOKEN`. Only the CLI boundary calls this.
    pub fn from_env() -> GitopsResult<Self> {
        let base_url = std::env::var("UPSHIFT_GITLAB_URL")
            .map_err(|_| GitopsError::MissingCredentials("UPSHIFT_GITLAB_URL".into()))?;
        let project = std::env::var("UPSHIFT_GITLAB_PROJECT")
            .map_err(|_| GitopsError::MissingCredentials("UPSHIFT_GITLAB_PROJECT".into()))?;
        let mut config = GitLabConfig::new(&base_url, &project);
        config.token = std::env::var("UPSHIFT_GITLAB_TOKEN").ok();
        Ok(config)
    }
}

/// Review-request host backed by a GitLab project.
pub struct GitLabHost {
    config: GitLabConfig,
    http: reqwest::Client,
}

// --- wire types -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: String,
    message: String,
    authored_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    iid: u64,
    source_branch: String,
    target_branch: String,
    title: String,
    state: String,
    has_conflicts: Option<bool>,
    web_url: Option<String>,
    head_pipeline: Option<PipelineResponse>,
}

#[derive(Debug, Deserialize)]
struct DiffEntry {
    new_path: String,
    old_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    diffs: Vec<DiffEntry>,
}

fn ci_status_from_pipeline(pipeline: Option<&PipelineResponse>) -> CiStatus {
    match pipeline.map(|p| p.status.as_str()) {
        Some("success") | Some("skipped") => CiStatus::Passed,
        Some("failed") | Some("canceled") => CiStatus::Failed,
        Some("running") => CiStatus::Running,
        // created / pending / waiting_for_resource / preparing / manual / none
        _ => CiStatus::Pending,
    }
}

fn review_request_from_response(mr: MergeRequestResponse) -> ReviewRequest {
    let state = match mr.state.as_str() {
        "merged" => ReviewRequestState::Merged,
        "closed" => ReviewRequestState::Closed,
        _ => ReviewRequestState::Open,
    };
    ReviewRequest {
        id: ReviewRequestId(mr.iid),
        source_branch: mr.source_branch,
        target_branch: mr.target_branch,
        title: mr.title,
        state,
        ci: ci_status_from_pipeline(mr.head_pipeline.as_ref()),
        has_conflicts: mr.has_conflicts.unwrap_or(false),
        web_url: mr.web_url,
    }
}

fn encode_path_component(raw: &str) -> String {
    // GitLab wants `/` and `.` of file paths percent-encoded in URLs
    raw.replace('%', "%25").replace('/', "%2F").replace('.', "%2E")
}

impl GitLabHost {
    pub fn new(config: GitLabConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("upshift/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        GitLabHost { config, http }
    }

    fn url(&self, tail: &str) -> String {
        format!(
            "{}/api/v4/projects/{}/{}",
            self.config.base_url,
            encode_path_component(&self.config.project),
            tail
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
                "UPSHIFT_GITLAB_TOKEN".into(),
            ));
        }
        Ok(())
    }

    /// Map non-success statuses onto the error taxonomy, keeping the body for
    /// diagnostics. 404 handling stays with the caller, which knows what was
    /// being looked up.
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

    async fn recent_commits(&self, branch: &str, count: u8) -> GitopsResult<Vec<CommitResponse>> {
        let url = self.url(&format!(
            "repository/commits?ref_name={branch}&per_page={count}"
        ));
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(GitopsError::BranchNotFound {
                branch: branch.to_string(),
            });
        }
        let commits: Vec<CommitResponse> = self.check(response).await?.json().await?;
        Ok(commits)
    }

    async fn changed_paths(&self, sha: &str) -> GitopsResult<Vec<DiffEntry>> {
        let url = self.url(&format!("repository/commits/{sha}/diff"));
        let response = self.authed(self.http.get(&url)).send().await?;
        let diffs: Vec<DiffEntry> = self.check(response).await?.json().await?;
        Ok(diffs)
    }
}

#[async_trait]
impl ReviewRequestHost for GitLabHost {
    async fn create_branch(&self, name: &str, from_ref: &str) -> GitopsResult<()> {
        self.require_token()?;
        let url = self.url(&format!("repository/branches?branch={name}&ref={from_ref}"));
        let response = self.authed(self.http.post(&url)).send().await?;
        if response.status().as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if body.contains("already exists") {
                return Err(GitopsError::BranchExists {
                    branch: name.to_string(),
                });
            }
            return Err(GitopsError::UnexpectedStatus { status: 400, body });
        }
        self.check(response).await?;
        debug!(branch = name, from_ref, "created branch");
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> GitopsResult<()> {
        self.require_token()?;
        let url = self.url(&format!("repository/branches/{}", encode_path_component(name)));
        let response = self.authed(self.http.delete(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        self.check(response).await?;
        Ok(())
    }

    async fn get_file(&self, path: &str, git_ref: &str) -> GitopsResult<String> {
        let url = self.url(&format!(
            "repository/files/{}/raw?ref={git_ref}",
            encode_path_component(path)
        ));
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(GitopsError::FileNotFound {
                path: path.to_string(),
                git_ref: git_ref.to_string(),
            });
        }
        Ok(self.check(response).await?.text().await?)
    }

    async fn update_file(
        &self,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> GitopsResult<()> {
        self.require_token()?;
        let url = self.url(&format!(
            "repository/files/{}",
            encode_path_component(path)
        ));
        let payload = json!({
            "branch": branch,
            "content": content,
            "commit_message": message,
        });
        let response = self
            .authed(self.http.put(&url))
            .json(&payload)
            .send()
            .await?;
        // PUT only updates existing files; fall back to POST for new ones
        if matches!(response.status().as_u16(), 400 | 404) {
            let response = self
                .authed(self.http.post(&url))
                .json(&payload)
                .send()
                .await?;
            self.check(response).await?;
            return Ok(());
        }
        self.check(response).await?;
        Ok(())
    }

    async fn last_commit(&self, branch: &str) -> GitopsResult<CommitInfo> {
        let commits = self.recent_commits(branch, 1).await?;
        let head = commits
            .into_iter()
            .next()
            .ok_or_else(|| GitopsError::BranchNotFound {
                branch: branch.to_string(),
            })?;
        Ok(CommitInfo {
            sha: head.id,
            message: head.message,
            authored_at: head.authored_date,
        })
    }

    async fn revert_last_commit(&self, branch: &str, message: &str) -> GitopsResult<CommitInfo> {
        self.require_token()?;
        let commits = self.recent_commits(branch, 2).await?;
        if commits.len() < 2 {
            return Err(GitopsError::NothingToRevert {
                branch: branch.to_string(),
            });
        }
        let head = &commits[0];
        let parent = &commits[1];

        // Build inverse actions: restore each touched path to its parent-side
        // content, so the commit message stays under our control.
        let mut actions = Vec::new();
        for diff in self.changed_paths(&head.id).await? {
            if diff.new_file {
                actions.push(json!({"action": "delete", "file_path": diff.new_path}));
            } else if diff.deleted_file {
                let content = self.get_file(&diff.old_path, &parent.id).await?;
                actions.push(json!({
                    "action": "create", "file_path": diff.old_path, "content": content,
                }));
            } else {
                let content = self.get_file(&diff.old_path, &parent.id).await?;
                actions.push(json!({
                    "action": "update", "file_path": diff.new_path, "content": content,
                }));
            }
        }
        if actions.is_empty() {
            return Err(GitopsError::NothingToRevert {
                branch: branch.to_string(),
            });
        }

        let url = self.url("repository/commits");
        let payload = json!({
            "branch": branch,
            "commit_message": message,
            "actions": actions,
        });
        let response = self
            .authed(self.http.post(&url))
            .json(&payload)
            .send()
            .await?;
        let commit: CommitResponse = self.check(response).await?.json().await?;
        Ok(CommitInfo {
            sha: commit.id,
            message: commit.message,
            authored_at: commit.authored_date,
        })
    }

    async fn create_review_request(&self, req: NewReviewRequest) -> GitopsResult<ReviewRequest> {
        self.require_token()?;
        let url = self.url("merge_requests");
        let payload = json!({
            "source_branch": req.source_branch,
            "target_branch": req.target_branch,
            "title": req.title,
            "description": req.description,
            "remove_source_branch": true,
        });
        let response = self
            .authed(self.http.post(&url))
            .json(&payload)
            .send()
            .await?;
        let mr: MergeRequestResponse = self.check(response).await?.json().await?;
        Ok(review_request_from_response(mr))
    }

    async fn get_review_request(&self, id: ReviewRequestId) -> GitopsResult<ReviewRequest> {
        let url = self.url(&format!("merge_requests/{}", id.0));
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(GitopsError::ReviewRequestNotFound { id: id.0 });
        }
        let mr: MergeRequestResponse = self.check(response).await?.json().await?;
        Ok(review_request_from_response(mr))
    }

    async fn merge_review_request(&self, id: ReviewRequestId) -> GitopsResult<()> {
        self.require_token()?;
        let url = self.url(&format!("merge_requests/{}/merge", id.0));
        let response = self
            .authed(self.http.put(&url))
            .json(&json!({"should_remove_source_branch": true}))
            .send()
            .await?;
        match response.status().as_u16() {
            404 => Err(GitopsError::ReviewRequestNotFound { id: id.0 }),
            405 | 406 | 409 | 422 => {
                let body = response.text().await.unwrap_or_default();
                Err(GitopsError::NotMergeable { id: id.0, reason: body })
            }
            _ => {
                self.check(response).await?;
                Ok(())
            }
        }
    }

    async fn close_review_request(
        &self,
        id: ReviewRequestId,
        note: Option<&str>,
    ) -> GitopsResult<()> {
        self.require_token()?;
        if let Some(note) = note {
            let url = self.url(&format!("merge_requests/{}/notes", id.0));
            let response = self
                .authed(self.http.post(&url))
                .json(&json!({"body": note}))
                .send()
                .await;
            // annotation is nice-to-have; closing matters more
            if let Err(e) = response {
                warn!(id = id.0, error = %e, "failed to annotate review request");
            }
        }
        let url = self.url(&format!("merge_requests/{}", id.0));
        let response = self
            .authed(self.http.put(&url))
            .json(&json!({"state_event": "close"}))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Err(GitopsError::ReviewRequestNotFound { id: id.0 });
        }
        self.check(response).await?;
        Ok(())
    }

    async fn list_open_review_requests(
        &self,
        target_branch: &str,
    ) -> GitopsResult<Vec<ReviewRequest>> {
        let url = self.url(&format!(
            "merge_requests?state=opened&target_branch={target_branch}&per_page=100"
        ));
        let response = self.authed(self.http.get(&url)).send().await?;
        let mrs: Vec<MergeRequestResponse> = self.check(response).await?.json().await?;
        Ok(mrs.into_iter().map(review_request_from_response).collect())
    }

    async fn conflicting_paths(&self, id: ReviewRequestId) -> GitopsResult<Vec<String>> {
        let request = self.get_review_request(id).await?;

        // paths the request itself touches
        let url = self.url(&format!("merge_requests/{}/diffs?per_page=100", id.0));
        let response = self.authed(self.http.get(&url)).send().await?;
        let ours: Vec<DiffEntry> = self.check(response).await?.json().await?;

        // paths the target moved since the request diverged
        let url = self.url(&format!(
            "repository/compare?from={}&to={}",
            request.source_branch, request.target_branch
        ));
        let response = self.authed(self.http.get(&url)).send().await?;
        let compare: CompareResponse = self.check(response).await?.json().await?;

        let theirs: std::collections::HashSet<String> = compare
            .diffs
            .into_iter()
            .map(|d| d.new_path)
            .collect();
        let mut paths: Vec<String> = ours
            .into_iter()
            .map(|d| d.new_path)
            .filter(|p| theirs.contains(p))
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = GitLabConfig::new("https://gitlab.example.com/", "platform/config");
        assert_eq!(config.base_url, "https://gitlab.example.com");
    }

    #[test]
    fn test_encode_path_component() {
        assert_eq!(encode_path_component("platform/config"), "platform%2Fconfig");
        assert_eq!(encode_path_component("envs/apps.json"), "envs%2Fapps%2Ejson");
    }

    #[test]
    fn test_ci_status_mapping() {
        let status = |s: &str| {
            ci_status_from_pipeline(Some(&PipelineResponse {
                status: s.to_string(),
            }))
        };
        assert_eq!(status("success"), CiStatus::Passed);
        assert_eq!(status("skipped"), CiStatus::Passed);
        assert_eq!(status("failed"), CiStatus::Failed);
        assert_eq!(status("canceled"), CiStatus::Failed);
        assert_eq!(status("running"), CiStatus::Running);
        assert_eq!(status("manual"), CiStatus::Pending);
        assert_eq!(ci_status_from_pipeline(None), CiStatus::Pending);
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let host = GitLabHost::new(GitLabConfig::new("https://gitlab.example.com", "p/c"));
        assert!(matches!(
            host.require_token(),
            Err(GitopsError::MissingCredentials(_))
        ));
    }
}
