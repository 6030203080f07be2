//! Git status probes and the rewind primitives the healer's spells drive.
//!
//! Status probes are best-effort per the `HealerContext` contract: a failed probe
//! degrades to an empty/null field rather than aborting context construction. The
//! rewind operations are not best-effort — their caller (a spell handler) needs to
//! know whether the tree actually became clean.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{ContextError, Result};

/// A best-effort snapshot of the working tree, as read by `git status --porcelain`
/// and friends.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GitStatus {
    pub branch: Option<String>,
    pub is_dirty: bool,
    pub modified_files: Vec<String>,
    pub untracked_files: Vec<String>,
    pub last_commit_sha: Option<String>,
    pub last_commit_subject: Option<String>,
}

async fn run_git(workdir: &Path, args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .map_err(ContextError::GitSpawn)?;

    if !output.status.success() {
        return Err(ContextError::GitFailed {
            command: format!("git {}", args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Best-effort probe of `workdir`'s git status. Never fails: any probe step that
/// errors just leaves the corresponding field at its default.
pub async fn status(workdir: &Path) -> GitStatus {
    debug!(?workdir, "git::status: called");
    let mut status = GitStatus::default();

    match run_git(workdir, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
        Ok(out) => status.branch = Some(out.trim().to_string()),
        Err(e) => warn!(%e, "git::status: branch probe failed"),
    }

    match run_git(workdir, &["status", "--porcelain"]).await {
        Ok(out) => {
            for line in out.lines() {
                let Some(rest) = line.get(3..) else { continue };
                if line.starts_with("??") {
                    status.untracked_files.push(rest.to_string());
                } else {
                    status.modified_files.push(rest.to_string());
                }
            }
            status.is_dirty = !status.modified_files.is_empty() || !status.untracked_files.is_empty();
        }
        Err(e) => warn!(%e, "git::status: porcelain probe failed"),
    }

    match run_git(workdir, &["log", "-1", "--format=%H|%s"]).await {
        Ok(out) => {
            if let Some((sha, subject)) = out.trim().split_once('|') {
                status.last_commit_sha = Some(sha.to_string());
                status.last_commit_subject = Some(subject.to_string());
            }
        }
        Err(e) => warn!(%e, "git::status: last-commit probe failed"),
    }

    status
}

/// Discards working-tree modifications and untracked files inside `workdir`, then
/// re-queries status. Used by the `rewind_uncommitted_changes` spell; succeeds iff
/// the tree is clean afterward.
pub async fn rewind_uncommitted(workdir: &Path) -> Result<GitStatus> {
    debug!(?workdir, "git::rewind_uncommitted: called");
    run_git(workdir, &["restore", "--staged", "--worktree", "."]).await?;
    run_git(workdir, &["clean", "-fd"]).await?;
    Ok(status(workdir).await)
}

/// Moves the working branch to `sha`. Refuses if the branch has diverged from its
/// upstream tracking branch unless `allow_force` is set, used by
/// `rewind_to_last_green_commit`.
pub async fn rewind_to_commit(workdir: &Path, sha: &str, allow_force: bool) -> Result<GitStatus> {
    debug!(?workdir, %sha, %allow_force, "git::rewind_to_commit: called");
    if !allow_force && let Ok(upstream) = run_git(workdir, &["rev-parse", "@{u}"]).await {
        let upstream = upstream.trim();
        let local = run_git(workdir, &["rev-parse", "HEAD"]).await?;
        if upstream != local.trim() {
            return Err(ContextError::GitFailed {
                command: "git reset (divergence check)".to_string(),
                code: None,
                stderr: "local branch has diverged from upstream; refusing without allow_force".to_string(),
            });
        }
    }
    run_git(workdir, &["reset", "--hard", sha]).await?;
    Ok(status(workdir).await)
}
