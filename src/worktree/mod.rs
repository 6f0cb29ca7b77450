//! Worktree Coordinator (C1, §4.1): creates/removes a git worktree + branch
//! per agent, runs a local merge with conflict reporting, and shells out to
//! `gh` to open a pull request.
//!
//! Every git/`gh` invocation below uses argv-array `Command` construction --
//! never a shell string -- so caller-supplied titles/bodies/branch names
//! never need escaping.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} is not a git repository")]
    NotGitRepository(String),
    #[error("failed to create worktree: {0}")]
    Create(String),
    #[error("git command failed: {0}")]
    Git(String),
    #[error("could not determine a target branch to merge into")]
    TargetBranchUnknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    FastForward,
    ThreeWayMerge,
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub success: bool,
    pub strategy: Option<MergeStrategy>,
    pub branch: String,
    pub target_branch: String,
    pub message: String,
    #[serde(rename = "conflicts")]
    pub conflicted_files: Vec<String>,
}

/// Stateless: every operation re-derives what it needs from the filesystem
/// and git's own bookkeeping, so there is no in-memory worktree registry to
/// keep in sync (unlike a fleet-wide orchestrator, this process owns exactly
/// one worktree per agent and the agent registry is the source of truth).
#[derive(Debug, Default)]
pub struct WorktreeCoordinator;

impl WorktreeCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// `workDir = <base_dir>/<agent_id>`. Creates the branch if it doesn't
    /// already exist locally, otherwise attaches the worktree to it.
    pub fn create_worktree(
        &self,
        source_repo: &Path,
        base_dir: &Path,
        agent_id: &str,
        branch_name: &str,
    ) -> Result<(PathBuf, String), WorktreeError> {
        if !is_git_repository(source_repo) {
            return Err(WorktreeError::NotGitRepository(source_repo.display().to_string()));
        }

        std::fs::create_dir_all(base_dir)?;
        let work_dir = base_dir.join(agent_id);

        if work_dir.exists() {
            return Ok((work_dir, branch_name.to_string()));
        }

        let branch_exists = run_git(source_repo, &["rev-parse", "--verify", &format!("refs/heads/{branch_name}")]).is_ok();

        let output = if branch_exists {
            Command::new("git")
                .arg("-C")
                .arg(source_repo)
                .args(["worktree", "add"])
                .arg(&work_dir)
                .arg(branch_name)
                .output()?
        } else {
            Command::new("git")
                .arg("-C")
                .arg(source_repo)
                .args(["worktree", "add", "-b", branch_name])
                .arg(&work_dir)
                .arg("HEAD")
                .output()?
        };

        if !output.status.success() {
            return Err(WorktreeError::Create(String::from_utf8_lossy(&output.stderr).to_string()));
        }

        Ok((work_dir, branch_name.to_string()))
    }

    /// Best-effort, idempotent. Falls back to a recursive filesystem delete
    /// plus `git worktree prune` if the git removal fails.
    pub fn remove_worktree(&self, source_repo: &Path, work_dir: &Path) {
        let removed = run_git(source_repo, &["worktree", "remove", "--force", &work_dir.to_string_lossy()]);
        if removed.is_err() && work_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(work_dir) {
                tracing::warn!("failed to remove worktree directory {}: {e}", work_dir.display());
            }
        }
        let _ = run_git(source_repo, &["worktree", "prune"]);
    }

    /// Attempts fast-forward, then a `--no-edit` merge; on conflict collects
    /// the unmerged-file list, aborts, and restores the original branch. Any
    /// unexpected failure still restores the original branch.
    pub fn try_local_merge(&self, work_dir: &Path, target_branch: Option<&str>) -> Result<MergeResult, WorktreeError> {
        let source_repo = main_worktree_root(work_dir)?;
        let branch = current_branch(work_dir)?;
        let target = match target_branch {
            Some(t) => t.to_string(),
            None => resolve_target_branch(&source_repo)?,
        };

        auto_commit(work_dir)?;

        let original_branch = current_branch(&source_repo)?;
        let result = (|| -> Result<MergeResult, WorktreeError> {
            run_git(&source_repo, &["checkout", &target])
                .map_err(|e| WorktreeError::Git(format!("checkout {target} failed: {e}")))?;

            let ff = Command::new("git")
                .arg("-C")
                .arg(&source_repo)
                .args(["merge", "--ff-only"])
                .arg(&branch)
                .output()?;
            if ff.status.success() {
                return Ok(MergeResult {
                    success: true,
                    strategy: Some(MergeStrategy::FastForward),
                    branch: branch.clone(),
                    target_branch: target.clone(),
                    message: format!("fast-forward merged {branch} into {target}"),
                    conflicted_files: vec![],
                });
            }

            let merge = Command::new("git")
                .arg("-C")
                .arg(&source_repo)
                .args(["merge", "--no-edit"])
                .arg(&branch)
                .output()?;
            if merge.status.success() {
                return Ok(MergeResult {
                    success: true,
                    strategy: Some(MergeStrategy::ThreeWayMerge),
                    branch: branch.clone(),
                    target_branch: target.clone(),
                    message: format!("three-way merged {branch} into {target}"),
                    conflicted_files: vec![],
                });
            }

            let conflicted = conflicted_files(&source_repo);
            let _ = run_git(&source_repo, &["merge", "--abort"]);
            Ok(MergeResult {
                success: false,
                strategy: Some(MergeStrategy::Conflict),
                branch: branch.clone(),
                target_branch: target.clone(),
                message: format!("merge of {branch} into {target} had {} conflict(s) -- aborted", conflicted.len()),
                conflicted_files: conflicted,
            })
        })();

        // Always restore the branch the caller was on, success or failure.
        let _ = run_git(&source_repo, &["checkout", &original_branch]);
        result
    }

    /// Pushes the worktree's current branch with upstream tracking, then
    /// shells out to `gh pr create --fill`. Returns the created PR URL.
    pub fn create_pull_request(&self, work_dir: &Path, title: &str, body: &str) -> Result<String, WorktreeError> {
        let branch = current_branch(work_dir)?;

        let push = Command::new("git")
            .arg("-C")
            .arg(work_dir)
            .args(["push", "-u", "origin", &branch])
            .output()?;
        if !push.status.success() {
            return Err(WorktreeError::Git(String::from_utf8_lossy(&push.stderr).to_string()));
        }

        let pr = Command::new("gh")
            .current_dir(work_dir)
            .args(["pr", "create", "--head", &branch, "--title", title, "--body", body])
            .output()?;
        if !pr.status.success() {
            return Err(WorktreeError::Git(String::from_utf8_lossy(&pr.stderr).to_string()));
        }

        Ok(String::from_utf8_lossy(&pr.stdout).trim().to_string())
    }

    pub fn get_status(&self, work_dir: &Path) -> Result<String, WorktreeError> {
        run_git(work_dir, &["status", "--porcelain"]).map_err(WorktreeError::Git)
    }

    pub fn get_diff(&self, work_dir: &Path) -> Result<String, WorktreeError> {
        run_git(work_dir, &["diff"]).map_err(WorktreeError::Git)
    }
}

fn is_git_repository(path: &Path) -> bool {
    run_git(path, &["rev-parse", "--git-dir"]).is_ok()
}

fn current_branch(work_dir: &Path) -> Result<String, WorktreeError> {
    run_git(work_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
        .map(|s| s.trim().to_string())
        .map_err(WorktreeError::Git)
}

/// The worktree's "main worktree" entry, i.e. the original `sourceRepo`
/// this worktree was created from (§4.1: discovered via the porcelain
/// listing rather than stored, so it survives server restarts).
fn main_worktree_root(work_dir: &Path) -> Result<PathBuf, WorktreeError> {
    let listing = run_git(work_dir, &["worktree", "list", "--porcelain"]).map_err(WorktreeError::Git)?;
    let first_path = listing
        .lines()
        .find_map(|l| l.strip_prefix("worktree "))
        .ok_or_else(|| WorktreeError::Git("git worktree list returned no entries".to_string()))?;
    Ok(PathBuf::from(first_path))
}

/// Caller override already handled by `try_local_merge`; this resolves the
/// remaining cases: `origin/HEAD` symbolic ref, else the first of `main`,
/// `master` that exists locally.
fn resolve_target_branch(source_repo: &Path) -> Result<String, WorktreeError> {
    if let Ok(symbolic) = run_git(source_repo, &["symbolic-ref", "refs/remotes/origin/HEAD"]) {
        if let Some(name) = symbolic.trim().strip_prefix("refs/remotes/origin/") {
            return Ok(name.to_string());
        }
    }

    for candidate in ["main", "master"] {
        if run_git(source_repo, &["rev-parse", "--verify", &format!("refs/heads/{candidate}")]).is_ok() {
            return Ok(candidate.to_string());
        }
    }

    Err(WorktreeError::TargetBranchUnknown)
}

fn auto_commit(work_dir: &Path) -> Result<(), WorktreeError> {
    let _ = run_git(work_dir, &["add", "-A"]);
    let status = run_git(work_dir, &["status", "--porcelain"]).unwrap_or_default();
    if status.trim().is_empty() {
        return Ok(());
    }

    let output = Command::new("git")
        .arg("-C")
        .arg(work_dir)
        .args(["commit", "-m", "auto-commit before merge"])
        .env("GIT_AUTHOR_NAME", "aiagent-console")
        .env("GIT_AUTHOR_EMAIL", "aiagent-console@local")
        .env("GIT_COMMITTER_NAME", "aiagent-console")
        .env("GIT_COMMITTER_EMAIL", "aiagent-console@local")
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("nothing to commit") {
            tracing::warn!("auto-commit before merge had issues: {stderr}");
        }
    }

    Ok(())
}

fn conflicted_files(source_repo: &Path) -> Vec<String> {
    run_git(source_repo, &["diff", "--name-only", "--diff-filter=U"])
        .map(|text| text.lines().filter(|l| !l.trim().is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .output()
        .map_err(|e| format!("failed to execute git: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn init_repo(dir: &Path) {
        StdCommand::new("git").arg("init").arg("-q").arg(dir).output().unwrap();
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["config", "user.email", "test@local"])
            .output()
            .unwrap();
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["config", "user.name", "test"])
            .output()
            .unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        StdCommand::new("git").arg("-C").arg(dir).args(["add", "-A"]).output().unwrap();
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["commit", "-q", "-m", "init"])
            .output()
            .unwrap();
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["branch", "-M", "main"])
            .output()
            .unwrap();
    }

    #[test]
    fn create_worktree_rejects_non_git_source() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let coordinator = WorktreeCoordinator::new();
        let result = coordinator.create_worktree(tmp.path(), base.path(), "agent-1", "agents/agent-1");
        assert!(matches!(result, Err(WorktreeError::NotGitRepository(_))));
    }

    #[test]
    fn create_worktree_checks_out_new_branch() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        let base = tempfile::tempdir().unwrap();
        let coordinator = WorktreeCoordinator::new();
        let (work_dir, branch) = coordinator
            .create_worktree(repo.path(), base.path(), "agent-1", "agents/agent-1")
            .unwrap();
        assert!(work_dir.exists());
        assert_eq!(branch, "agents/agent-1");
        assert_eq!(current_branch(&work_dir).unwrap(), "agents/agent-1");
    }

    #[test]
    fn fast_forward_merge_succeeds_with_no_conflicts() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        let base = tempfile::tempdir().unwrap();
        let coordinator = WorktreeCoordinator::new();
        let (work_dir, _branch) = coordinator
            .create_worktree(repo.path(), base.path(), "agent-1", "agents/agent-1")
            .unwrap();

        std::fs::write(work_dir.join("new_file.txt"), "content\n").unwrap();
        let result = coordinator.try_local_merge(&work_dir, Some("main")).unwrap();
        assert!(result.success);
        assert_eq!(result.strategy, Some(MergeStrategy::FastForward));
        assert!(repo.path().join("new_file.txt").exists());
    }
}
