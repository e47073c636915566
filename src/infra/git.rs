use crate::config::REPO_CONFIG_FILE;
use crate::error::VibemanError;
use crate::infra::command::{CommandRunner, CommandSpec, CommandOutput};
use git2::Repository;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const GIT_TIMEOUT: Duration = Duration::from_secs(60);
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// One entry from `git worktree list`.
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub commit: String,
}

/// Git driver. Mutations and porcelain listings shell out to the `git`
/// binary (with `LC_ALL=C` so output parsing is locale-stable); read-only
/// discovery uses libgit2. Never touches working-tree contents — only Git
/// metadata and the worktree directory's existence.
#[derive(Clone)]
pub struct GitDriver {
    runner: Arc<dyn CommandRunner>,
}

impl GitDriver {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn git(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, VibemanError> {
        let mut spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .env("LC_ALL", "C")
            .timeout(timeout);
        if let Some(dir) = cwd {
            spec = spec.cwd(dir);
        }
        self.runner.run(spec, cancel).await
    }

    /// Whether `path` is (inside) a git repository, bare or not.
    pub fn is_repository(&self, path: &Path) -> bool {
        Repository::open(path).is_ok()
    }

    /// Clone `remote_url` to `destination`.
    pub async fn clone_repo(
        &self,
        remote_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        let dest = destination.to_string_lossy().into_owned();
        let out = self
            .git(None, &["clone", remote_url, &dest], CLONE_TIMEOUT, cancel)
            .await?;
        if !out.success() {
            return Err(VibemanError::git(
                "git.clone",
                format!("clone of {remote_url} failed: {}", out.error_text()),
            )
            .with_hint("check the URL and your network/auth configuration"));
        }
        Ok(())
    }

    /// Walk up from `starting_path` to find the repo config file. A
    /// worktree's `.git` pointer file is followed into the main repository
    /// so every worktree resolves to the canonical config.
    pub fn find_project_config(&self, starting_path: &Path) -> Result<PathBuf, VibemanError> {
        let mut current = Some(starting_path);
        while let Some(dir) = current {
            let candidate = dir.join(REPO_CONFIG_FILE);
            if candidate.is_file() {
                return Ok(candidate);
            }
            // Linked worktrees have a `.git` file pointing into the main
            // repo's metadata; the canonical config lives at the main root.
            if dir.join(".git").is_file() {
                if let Some(main_root) = main_repo_root(dir) {
                    let candidate = main_root.join(REPO_CONFIG_FILE);
                    if candidate.is_file() {
                        return Ok(candidate);
                    }
                }
            }
            current = dir.parent();
        }
        Err(VibemanError::not_found(
            "git.find-config",
            format!("{REPO_CONFIG_FILE} above {}", starting_path.display()),
        ))
    }

    /// Resolve a path to `(repository-name, worktree-name)`. The primary
    /// checkout resolves to `"main"`; a linked worktree resolves to its
    /// branch's friendly name (the final path segment of the branch).
    pub async fn resolve_path(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(String, String), VibemanError> {
        let git_dir = self
            .git(Some(path), &["rev-parse", "--git-dir"], GIT_TIMEOUT, cancel)
            .await?;
        if !git_dir.success() {
            return Err(VibemanError::git(
                "git.resolve-path",
                format!("{} is not inside a git repository", path.display()),
            ));
        }
        let common = self
            .git(
                Some(path),
                &["rev-parse", "--git-common-dir"],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        let git_dir = absolutize(path, git_dir.stdout.trim());
        let common_dir = absolutize(path, common.stdout.trim());

        let repo_root = common_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());
        let repo_name = repo_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if git_dir == common_dir {
            return Ok((repo_name, "main".to_string()));
        }
        let branch = self.current_branch(path, cancel).await?;
        let friendly = branch.rsplit('/').next().unwrap_or(&branch).to_string();
        Ok((repo_name, friendly))
    }

    /// Create `branch` (from `base`, or the repo default when absent) and
    /// attach it as a worktree at `destination`. When the branch already
    /// exists it is reused; the only hard refusal is a branch that is
    /// already checked out in another worktree.
    pub async fn create_worktree(
        &self,
        repo_dir: &Path,
        branch: &str,
        destination: &Path,
        base: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        let dest = destination.to_string_lossy().into_owned();

        if self.branch_exists(repo_dir, branch) {
            let out = self
                .git(
                    Some(repo_dir),
                    &["worktree", "add", &dest, branch],
                    GIT_TIMEOUT,
                    cancel,
                )
                .await?;
            if !out.success() {
                let stderr = out.error_text();
                if stderr.contains("already checked out") || stderr.contains("already used by worktree")
                {
                    return Err(VibemanError::new(
                        crate::error::ErrorKind::AlreadyExists,
                        "git.worktree-add",
                        format!("branch '{branch}' is already checked out in another worktree"),
                    )
                    .with_hint("pick a different branch or remove the other worktree"));
                }
                return Err(VibemanError::git(
                    "git.worktree-add",
                    format!("worktree add failed: {stderr}"),
                ));
            }
            return Ok(());
        }

        let base = match base {
            Some(b) => b.to_string(),
            None => self.default_branch(repo_dir),
        };
        let out = self
            .git(
                Some(repo_dir),
                &["worktree", "add", "-b", branch, &dest, &base],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        if !out.success() {
            return Err(VibemanError::git(
                "git.worktree-add",
                format!("worktree add -b {branch} failed: {}", out.error_text()),
            ));
        }
        debug!(branch, destination = %destination.display(), "worktree created");
        Ok(())
    }

    /// Detach `destination` from the repository's worktree metadata.
    /// Tolerates the directory being already gone; deleting the directory
    /// itself is a separate step the caller controls.
    pub async fn remove_worktree(
        &self,
        repo_dir: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        if destination.exists() {
            let dest = destination.to_string_lossy().into_owned();
            let out = self
                .git(
                    Some(repo_dir),
                    &["worktree", "remove", "--force", &dest],
                    GIT_TIMEOUT,
                    cancel,
                )
                .await?;
            if !out.success() && !out.error_text().contains("is not a working tree") {
                return Err(VibemanError::git(
                    "git.worktree-remove",
                    format!("worktree remove failed: {}", out.error_text()),
                ));
            }
        }
        // The directory may have been deleted out from under git; prune
        // clears the stale metadata either way.
        let _ = self
            .git(Some(repo_dir), &["worktree", "prune"], GIT_TIMEOUT, cancel)
            .await;
        Ok(())
    }

    /// Parse `git worktree list --porcelain` into (path, branch, commit).
    pub async fn list_worktrees(
        &self,
        repo_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorktreeInfo>, VibemanError> {
        let out = self
            .git(
                Some(repo_dir),
                &["worktree", "list", "--porcelain"],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        if !out.success() {
            return Err(VibemanError::git(
                "git.worktree-list",
                format!("worktree list failed: {}", out.error_text()),
            ));
        }
        Ok(parse_worktree_porcelain(&out.stdout))
    }

    /// Any staged or unstaged changes in the working tree.
    pub async fn has_uncommitted_changes(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, VibemanError> {
        let out = self
            .git(Some(path), &["status", "--porcelain"], GIT_TIMEOUT, cancel)
            .await?;
        if !out.success() {
            return Err(VibemanError::git(
                "git.status",
                format!("status failed: {}", out.error_text()),
            ));
        }
        Ok(!out.stdout.trim().is_empty())
    }

    /// Commits on HEAD that no remote ref contains. A repo without
    /// remotes has nowhere to push, so nothing counts as unpushed.
    pub async fn has_unpushed_commits(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, VibemanError> {
        let remotes = self
            .git(Some(path), &["remote"], GIT_TIMEOUT, cancel)
            .await?;
        if remotes.stdout.trim().is_empty() {
            return Ok(false);
        }
        // Prefer the upstream when one is configured.
        let out = self
            .git(
                Some(path),
                &["rev-list", "--count", "@{upstream}..HEAD"],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        if out.success() {
            let count: u64 = out.stdout.trim().parse().unwrap_or(0);
            return Ok(count > 0);
        }
        // No upstream: anything reachable from HEAD but from no remote.
        let out = self
            .git(
                Some(path),
                &["log", "--oneline", "HEAD", "--not", "--remotes"],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        Ok(out.success() && !out.stdout.trim().is_empty())
    }

    /// Whether `branch` is an ancestor of the repo's default branch.
    pub async fn is_branch_merged(
        &self,
        repo_dir: &Path,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, VibemanError> {
        let default = self.default_branch(repo_dir);
        let out = self
            .git(
                Some(repo_dir),
                &["merge-base", "--is-ancestor", branch, &default],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        Ok(out.success())
    }

    pub async fn current_branch(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, VibemanError> {
        let out = self
            .git(
                Some(path),
                &["rev-parse", "--abbrev-ref", "HEAD"],
                GIT_TIMEOUT,
                cancel,
            )
            .await?;
        if !out.success() {
            return Err(VibemanError::git(
                "git.current-branch",
                format!("rev-parse failed: {}", out.error_text()),
            ));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// The repository's default branch: local `main` or `master`, then
    /// their origin counterparts, then the literal `"main"`.
    pub fn default_branch(&self, repo_dir: &Path) -> String {
        let Ok(repo) = Repository::open(repo_dir) else {
            return "main".to_string();
        };
        for candidate in &[
            "refs/heads/main",
            "refs/heads/master",
            "refs/remotes/origin/main",
            "refs/remotes/origin/master",
        ] {
            if repo.find_reference(candidate).is_ok() {
                return candidate.rsplit('/').next().unwrap().to_string();
            }
        }
        "main".to_string()
    }

    fn branch_exists(&self, repo_dir: &Path, branch: &str) -> bool {
        let Ok(repo) = Repository::open(repo_dir) else {
            return false;
        };
        repo.find_branch(branch, git2::BranchType::Local).is_ok()
    }
}

/// Resolve the main repository root from a linked worktree directory by
/// chasing the `gitdir:` pointer in its `.git` file. The pointer lands in
/// `<root>/.git/worktrees/<name>`; the root is two levels above that.
fn main_repo_root(worktree_dir: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(worktree_dir.join(".git")).ok()?;
    let gitdir = content.strip_prefix("gitdir:")?.trim();
    let gitdir = absolutize(worktree_dir, gitdir);
    let idx = gitdir
        .components()
        .position(|c| c.as_os_str() == "worktrees")?;
    let common: PathBuf = gitdir.components().take(idx).collect();
    common.parent().map(Path::to_path_buf)
}

fn absolutize(base: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    let p = if p.is_absolute() { p } else { base.join(p) };
    p.canonicalize().unwrap_or(p)
}

fn parse_worktree_porcelain(stdout: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    for block in stdout.split("\n\n") {
        let mut path = None;
        let mut branch = None;
        let mut commit = String::new();
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(c) = line.strip_prefix("HEAD ") {
                commit = c.to_string();
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                branch = Some(b.to_string());
            } else if line == "detached" {
                branch = Some(String::new());
            }
        }
        if let (Some(path), Some(branch)) = (path, branch) {
            worktrees.push(WorktreeInfo {
                path,
                branch,
                commit,
            });
        }
    }
    worktrees
}
