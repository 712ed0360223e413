//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `MemoryReviewHost`, `MemorySyncAgent`, `MemoryArtifactRepository`,
//! and `MemoryImageRegistry` that satisfy the trait contracts without any
//! external services. The host fake keeps real per-branch commit history so
//! merge-base and conflict behavior match what a git-backed host reports.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{GitopsError, GitopsResult};
use crate::traits::*;

// ---------------------------------------------------------------------------
// MemoryReviewHost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CommitEntry {
    info: CommitInfo,
    /// Full file tree as of this commit
    files_after: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct BranchState {
    commits: Vec<CommitEntry>,
}

impl BranchState {
    fn head(&self) -> Option<&CommitEntry> {
        self.commits.last()
    }

    fn files(&self) -> HashMap<String, String> {
        self.head().map(|c| c.files_after.clone()).unwrap_or_default()
    }
}

#[derive(Debug)]
struct HostState {
    branches: HashMap<String, BranchState>,
    requests: HashMap<u64, ReviewRequest>,
    annotations: HashMap<u64, Vec<String>>,
    next_request_id: u64,
    next_sha: u64,
    auto_ci: CiStatus,
}

/// In-memory review-request host backed by per-branch commit histories.
///
/// Conflicts are computed structurally (both sides changed a path since the
/// merge base, with differing content), so resolving by copying the target's
/// content onto the work branch clears them exactly as it would on a real
/// host.
#[derive(Debug)]
pub struct MemoryReviewHost {
    state: Mutex<HostState>,
}

impl Default for MemoryReviewHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReviewHost {
    pub fn new() -> Self {
        MemoryReviewHost {
            state: Mutex::new(HostState {
                branches: HashMap::new(),
                requests: HashMap::new(),
                annotations: HashMap::new(),
                next_request_id: 1,
                next_sha: 1,
                auto_ci: CiStatus::Passed,
            }),
        }
    }

    /// CI verdict newly created review requests report (default `Passed`).
    pub fn set_auto_ci(&self, ci: CiStatus) {
        self.state.lock().unwrap().auto_ci = ci;
    }

    /// Override the CI verdict of an existing request.
    pub fn set_ci(&self, id: ReviewRequestId, ci: CiStatus) {
        if let Some(req) = self.state.lock().unwrap().requests.get_mut(&id.0) {
            req.ci = ci;
        }
    }

    /// Create a branch with an initial commit containing the given files.
    pub fn seed_branch(&self, name: &str, files: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let tree: HashMap<String, String> = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        let sha = next_sha(&mut state);
        state.branches.insert(
            name.to_string(),
            BranchState {
                commits: vec![CommitEntry {
                    info: CommitInfo {
                        sha,
                        message: format!("seed {name}"),
                        authored_at: Utc::now(),
                    },
                    files_after: tree,
                }],
            },
        );
    }

    /// Current file tree of a branch (assertion helper).
    pub fn branch_files(&self, name: &str) -> HashMap<String, String> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(name)
            .map(|b| b.files())
            .unwrap_or_default()
    }

    /// Commit messages of a branch, oldest first (assertion helper).
    pub fn commit_messages(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(name)
            .map(|b| b.commits.iter().map(|c| c.info.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Notes posted when closing a request (assertion helper).
    pub fn annotations(&self, id: ReviewRequestId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .annotations
            .get(&id.0)
            .cloned()
            .unwrap_or_default()
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().branches.contains_key(name)
    }

    /// HEAD sha of a branch, `None` when absent (assertion helper).
    pub fn head_sha(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(name)
            .and_then(|b| b.head())
            .map(|c| c.info.sha.clone())
    }
}

fn next_sha(state: &mut HostState) -> String {
    let sha = format!("{:040x}", state.next_sha);
    state.next_sha += 1;
    sha
}

/// Last commit present in both histories (the merge base).
fn merge_base(source: &BranchState, target: &BranchState) -> Option<CommitEntry> {
    let target_shas: HashSet<&str> = target.commits.iter().map(|c| c.info.sha.as_str()).collect();
    source
        .commits
        .iter()
        .rev()
        .find(|c| target_shas.contains(c.info.sha.as_str()))
        .cloned()
}

/// Paths changed on both sides since the merge base with differing content.
fn conflicted_paths(source: &BranchState, target: &BranchState) -> Vec<String> {
    let base = match merge_base(source, target) {
        Some(b) => b.files_after,
        None => HashMap::new(),
    };
    let src = source.files();
    let tgt = target.files();
    let mut paths: Vec<String> = src
        .keys()
        .chain(tgt.keys())
        .chain(base.keys())
        .collect::<HashSet<_>>()
        .into_iter()
        .filter(|p| {
            let src_changed = src.get(*p) != base.get(*p);
            let tgt_changed = tgt.get(*p) != base.get(*p);
            src_changed && tgt_changed && src.get(*p) != tgt.get(*p)
        })
        .cloned()
        .collect();
    paths.sort();
    paths
}

fn refresh_conflicts(state: &mut HostState, id: u64) {
    let Some(req) = state.requests.get(&id) else {
        return;
    };
    let (Some(source), Some(target)) = (
        state.branches.get(&req.source_branch),
        state.branches.get(&req.target_branch),
    ) else {
        return;
    };
    let conflicted = !conflicted_paths(source, target).is_empty();
    if let Some(req) = state.requests.get_mut(&id) {
        req.has_conflicts = conflicted;
    }
}

#[async_trait]
impl ReviewRequestHost for MemoryReviewHost {
    async fn create_branch(&self, name: &str, from_ref: &str) -> GitopsResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.branches.contains_key(name) {
            return Err(GitopsError::BranchExists {
                branch: name.to_string(),
            });
        }
        let source = state
            .branches
            .get(from_ref)
            .cloned()
            .ok_or_else(|| GitopsError::BranchNotFound {
                branch: from_ref.to_string(),
            })?;
        state.branches.insert(name.to_string(), source);
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> GitopsResult<()> {
        self.state.lock().unwrap().branches.remove(name);
        Ok(())
    }

    async fn get_file(&self, path: &str, git_ref: &str) -> GitopsResult<String> {
        let state = self.state.lock().unwrap();
        if let Some(branch) = state.branches.get(git_ref) {
            return branch
                .files()
                .get(path)
                .cloned()
                .ok_or_else(|| GitopsError::FileNotFound {
                    path: path.to_string(),
                    git_ref: git_ref.to_string(),
                });
        }
        // fall back to commit-sha lookup
        for branch in state.branches.values() {
            if let Some(commit) = branch.commits.iter().find(|c| c.info.sha == git_ref) {
                return commit.files_after.get(path).cloned().ok_or_else(|| {
                    GitopsError::FileNotFound {
                        path: path.to_string(),
                        git_ref: git_ref.to_string(),
                    }
                });
            }
        }
        Err(GitopsError::BranchNotFound {
            branch: git_ref.to_string(),
        })
    }

    async fn update_file(
        &self,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> GitopsResult<()> {
        let mut state = self.state.lock().unwrap();
        let sha = next_sha(&mut state);
        let branch_state =
            state
                .branches
                .get_mut(branch)
                .ok_or_else(|| GitopsError::BranchNotFound {
                    branch: branch.to_string(),
                })?;
        let mut files = branch_state.files();
        files.insert(path.to_string(), content.to_string());
        branch_state.commits.push(CommitEntry {
            info: CommitInfo {
                sha,
                message: message.to_string(),
                authored_at: Utc::now(),
            },
            files_after: files,
        });
        Ok(())
    }

    async fn last_commit(&self, branch: &str) -> GitopsResult<CommitInfo> {
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(branch)
            .and_then(|b| b.head())
            .map(|c| c.info.clone())
            .ok_or_else(|| GitopsError::BranchNotFound {
                branch: branch.to_string(),
            })
    }

    async fn revert_last_commit(&self, branch: &str, message: &str) -> GitopsResult<CommitInfo> {
        let mut state = self.state.lock().unwrap();
        let sha = next_sha(&mut state);
        let branch_state =
            state
                .branches
                .get_mut(branch)
                .ok_or_else(|| GitopsError::BranchNotFound {
                    branch: branch.to_string(),
                })?;
        if branch_state.commits.len() < 2 {
            return Err(GitopsError::NothingToRevert {
                branch: branch.to_string(),
            });
        }
        let restored = branch_state.commits[branch_state.commits.len() - 2]
            .files_after
            .clone();
        let info = CommitInfo {
            sha,
            message: message.to_string(),
            authored_at: Utc::now(),
        };
        branch_state.commits.push(CommitEntry {
            info: info.clone(),
            files_after: restored,
        });
        Ok(info)
    }

    async fn create_review_request(&self, req: NewReviewRequest) -> GitopsResult<ReviewRequest> {
        let mut state = self.state.lock().unwrap();
        for branch in [&req.source_branch, &req.target_branch] {
            if !state.branches.contains_key(branch) {
                return Err(GitopsError::BranchNotFound {
                    branch: branch.clone(),
                });
            }
        }
        let id = state.next_request_id;
        state.next_request_id += 1;
        let request = ReviewRequest {
            id: ReviewRequestId(id),
            source_branch: req.source_branch,
            target_branch: req.target_branch,
            title: req.title,
            state: ReviewRequestState::Open,
            ci: state.auto_ci,
            has_conflicts: false,
            web_url: None,
        };
        state.requests.insert(id, request.clone());
        refresh_conflicts(&mut state, id);
        Ok(state.requests[&id].clone())
    }

    async fn get_review_request(&self, id: ReviewRequestId) -> GitopsResult<ReviewRequest> {
        let mut state = self.state.lock().unwrap();
        refresh_conflicts(&mut state, id.0);
        state
            .requests
            .get(&id.0)
            .cloned()
            .ok_or(GitopsError::ReviewRequestNotFound { id: id.0 })
    }

    async fn merge_review_request(&self, id: ReviewRequestId) -> GitopsResult<()> {
        let mut state = self.state.lock().unwrap();
        let sha = next_sha(&mut state);
        let req = state
            .requests
            .get(&id.0)
            .cloned()
            .ok_or(GitopsError::ReviewRequestNotFound { id: id.0 })?;
        if req.state != ReviewRequestState::Open {
            return Err(GitopsError::NotMergeable {
                id: id.0,
                reason: format!("state is {:?}", req.state),
            });
        }
        let source = state
            .branches
            .get(&req.source_branch)
            .cloned()
            .ok_or_else(|| GitopsError::BranchNotFound {
                branch: req.source_branch.clone(),
            })?;
        let target = state
            .branches
            .get(&req.target_branch)
            .cloned()
            .ok_or_else(|| GitopsError::BranchNotFound {
                branch: req.target_branch.clone(),
            })?;
        let conflicts = conflicted_paths(&source, &target);
        if !conflicts.is_empty() {
            return Err(GitopsError::NotMergeable {
                id: id.0,
                reason: format!("conflicting paths: {}", conflicts.join(", ")),
            });
        }
        // three-way merge: a side that changed a path since the base wins
        let base = merge_base(&source, &target)
            .map(|c| c.files_after)
            .unwrap_or_default();
        let src = source.files();
        let tgt = target.files();
        let mut merged = HashMap::new();
        let all: HashSet<&String> = src.keys().chain(tgt.keys()).chain(base.keys()).collect();
        for path in all {
            let value = if src.get(path) != base.get(path) {
                src.get(path)
            } else {
                tgt.get(path)
            };
            if let Some(v) = value {
                merged.insert(path.clone(), v.clone());
            }
        }
        let merge_commit = CommitEntry {
            info: CommitInfo {
                sha,
                message: format!(
                    "Merge branch '{}' into '{}'",
                    req.source_branch, req.target_branch
                ),
                authored_at: Utc::now(),
            },
            files_after: merged,
        };
        // the merge commit joins both histories
        let mut joined = target.commits.clone();
        for commit in &source.commits {
            if !joined.iter().any(|c| c.info.sha == commit.info.sha) {
                joined.push(commit.clone());
            }
        }
        joined.push(merge_commit);
        state
            .branches
            .insert(req.target_branch.clone(), BranchState { commits: joined });
        if let Some(req) = state.requests.get_mut(&id.0) {
            req.state = ReviewRequestState::Merged;
        }
        Ok(())
    }

    async fn close_review_request(
        &self,
        id: ReviewRequestId,
        note: Option<&str>,
    ) -> GitopsResult<()> {
        let mut state = self.state.lock().unwrap();
        let req = state
            .requests
            .get_mut(&id.0)
            .ok_or(GitopsError::ReviewRequestNotFound { id: id.0 })?;
        match req.state {
            ReviewRequestState::Merged => {
                return Err(GitopsError::UnexpectedStatus {
                    status: 405,
                    body: format!("review request !{} is merged", id.0),
                })
            }
            ReviewRequestState::Closed => return Ok(()),
            ReviewRequestState::Open => req.state = ReviewRequestState::Closed,
        }
        if let Some(note) = note {
            state
                .annotations
                .entry(id.0)
                .or_default()
                .push(note.to_string());
        }
        Ok(())
    }

    async fn list_open_review_requests(
        &self,
        target_branch: &str,
    ) -> GitopsResult<Vec<ReviewRequest>> {
        let state = self.state.lock().unwrap();
        let mut open: Vec<ReviewRequest> = state
            .requests
            .values()
            .filter(|r| r.state == ReviewRequestState::Open && r.target_branch == target_branch)
            .cloned()
            .collect();
        open.sort_by_key(|r| r.id.0);
        Ok(open)
    }

    async fn conflicting_paths(&self, id: ReviewRequestId) -> GitopsResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let req = state
            .requests
            .get(&id.0)
            .ok_or(GitopsError::ReviewRequestNotFound { id: id.0 })?;
        let (Some(source), Some(target)) = (
            state.branches.get(&req.source_branch),
            state.branches.get(&req.target_branch),
        ) else {
            return Ok(Vec::new());
        };
        Ok(conflicted_paths(source, target))
    }
}

// ---------------------------------------------------------------------------
// MemorySyncAgent
// ---------------------------------------------------------------------------

/// One application the agent mirrors off a fake host branch.
#[derive(Debug)]
struct TrackedApp {
    host: Arc<MemoryReviewHost>,
    branch: String,
    /// Sync/health pairs consumed per poll; the last one repeats.
    phases: Vec<(SyncState, HealthState)>,
}

/// In-memory sync agent with scripted status sequences per application.
///
/// Two modes per app:
/// - scripted: each `status` call consumes the front of the app's queue until
///   one entry remains, which then repeats; this lets tests script
///   `Progressing` → `Healthy` transitions against a polling loop.
/// - tracking: the reported revision always mirrors the HEAD of a
///   [`MemoryReviewHost`] branch, so tests never have to predict commit shas;
///   sync/health still follow a scripted phase sequence.
#[derive(Debug, Default)]
pub struct MemorySyncAgent {
    apps: Mutex<HashMap<String, Vec<AppSyncStatus>>>,
    tracked: Mutex<HashMap<String, TrackedApp>>,
}

impl MemorySyncAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the app's script with a single repeating status.
    pub fn set_status(&self, app: &str, status: AppSyncStatus) {
        self.apps
            .lock()
            .unwrap()
            .insert(app.to_string(), vec![status]);
    }

    /// Append a status to the app's script.
    pub fn push_status(&self, app: &str, status: AppSyncStatus) {
        self.apps
            .lock()
            .unwrap()
            .entry(app.to_string())
            .or_default()
            .push(status);
    }

    /// Mirror the branch's HEAD as the app's revision, always synced and
    /// healthy.
    pub fn track(&self, app: &str, host: Arc<MemoryReviewHost>, branch: &str) {
        self.track_with_phases(app, host, branch, vec![(SyncState::Synced, HealthState::Healthy)]);
    }

    /// Mirror the branch's HEAD as the app's revision while walking through
    /// the given sync/health phases (last repeats).
    pub fn track_with_phases(
        &self,
        app: &str,
        host: Arc<MemoryReviewHost>,
        branch: &str,
        phases: Vec<(SyncState, HealthState)>,
    ) {
        self.tracked.lock().unwrap().insert(
            app.to_string(),
            TrackedApp {
                host,
                branch: branch.to_string(),
                phases,
            },
        );
    }

    fn next(&self, app: &str) -> GitopsResult<AppSyncStatus> {
        if let Some(tracked) = self.tracked.lock().unwrap().get_mut(app) {
            let (sync, health) = if tracked.phases.len() > 1 {
                tracked.phases.remove(0)
            } else {
                tracked
                    .phases
                    .last()
                    .copied()
                    .unwrap_or((SyncState::Synced, HealthState::Healthy))
            };
            let revision = tracked.host.head_sha(&tracked.branch).unwrap_or_default();
            return Ok(AppSyncStatus {
                revision,
                sync,
                health,
            });
        }
        let mut apps = self.apps.lock().unwrap();
        let queue = apps
            .get_mut(app)
            .ok_or_else(|| GitopsError::UnexpectedStatus {
                status: 404,
                body: format!("application {app} not found"),
            })?;
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            queue
                .first()
                .cloned()
                .ok_or_else(|| GitopsError::UnexpectedStatus {
                    status: 404,
                    body: format!("application {app} not found"),
                })
        }
    }
}

#[async_trait]
impl SyncAgent for MemorySyncAgent {
    async fn revision(&self, app: &str) -> GitopsResult<String> {
        Ok(self.next(app)?.revision)
    }

    async fn status(&self, app: &str) -> GitopsResult<AppSyncStatus> {
        self.next(app)
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactRepository
// ---------------------------------------------------------------------------

/// In-memory artifact repository backed by a `HashMap<(name, version), bytes>`.
#[derive(Debug)]
pub struct MemoryArtifactRepository {
    kind: RepositoryKind,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryArtifactRepository {
    pub fn new(kind: RepositoryKind) -> Self {
        MemoryArtifactRepository {
            kind,
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a version with placeholder bytes.
    pub fn seed(&self, name: &str, version: &str) {
        self.objects.lock().unwrap().insert(
            (name.to_string(), version.to_string()),
            format!("{name}-{version}").into_bytes(),
        );
    }
}

#[async_trait]
impl ArtifactRepository for MemoryArtifactRepository {
    fn kind(&self) -> RepositoryKind {
        self.kind
    }

    async fn download(&self, name: &str, version: &str) -> GitopsResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| GitopsError::ArtifactNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn publish(&self, name: &str, version: &str, data: &[u8]) -> GitopsResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let key = (name.to_string(), version.to_string());
        if objects.contains_key(&key) {
            return Err(GitopsError::AlreadyPublished {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        objects.insert(key, data.to_vec());
        Ok(())
    }

    async fn exists(&self, name: &str, version: &str) -> GitopsResult<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(name.to_string(), version.to_string())))
    }

    async fn versions(&self, name: &str) -> GitopsResult<Vec<String>> {
        let mut versions: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect();
        versions.sort();
        Ok(versions)
    }
}

// ---------------------------------------------------------------------------
// MemoryImageRegistry
// ---------------------------------------------------------------------------

/// In-memory image registry with a remote set and a local (pulled/tagged) set.
#[derive(Debug, Default)]
pub struct MemoryImageRegistry {
    remote: Mutex<HashSet<String>>,
    local: Mutex<HashSet<String>>,
    operations: Mutex<Vec<String>>,
}

impl MemoryImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a reference available for pulling.
    pub fn seed_remote(&self, reference: &ImageReference) {
        self.remote.lock().unwrap().insert(reference.to_string());
    }

    /// Log of pull/tag/push calls in order (assertion helper).
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageRegistry for MemoryImageRegistry {
    async fn pull(&self, reference: &ImageReference) -> GitopsResult<()> {
        let key = reference.to_string();
        if !self.remote.lock().unwrap().contains(&key) {
            return Err(GitopsError::ImageNotFound { reference: key });
        }
        self.local.lock().unwrap().insert(key.clone());
        self.operations.lock().unwrap().push(format!("pull {key}"));
        Ok(())
    }

    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> GitopsResult<()> {
        let src = source.to_string();
        if !self.local.lock().unwrap().contains(&src) {
            return Err(GitopsError::Image(format!("image not pulled: {src}")));
        }
        let dst = target.to_string();
        self.local.lock().unwrap().insert(dst.clone());
        self.operations
            .lock()
            .unwrap()
            .push(format!("tag {src} {dst}"));
        Ok(())
    }

    async fn push(&self, reference: &ImageReference) -> GitopsResult<()> {
        let key = reference.to_string();
        if !self.local.lock().unwrap().contains(&key) {
            return Err(GitopsError::Image(format!("image not tagged: {key}")));
        }
        self.remote.lock().unwrap().insert(key.clone());
        self.operations.lock().unwrap().push(format!("push {key}"));
        Ok(())
    }

    async fn tag_exists(&self, reference: &ImageReference) -> GitopsResult<bool> {
        Ok(self
            .remote
            .lock()
            .unwrap()
            .contains(&reference.to_string()))
    }
}
