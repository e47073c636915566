//! Repository registration: adopt a local checkout or clone a remote URL,
//! guard removal against live worktrees. Never deletes repository files.

use crate::config::{GlobalConfig, RepoConfig, REPO_CONFIG_FILE};
use crate::domain::repository::Repository;
use crate::error::VibemanError;
use crate::infra::catalog::Catalog;
use crate::infra::git::GitDriver;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Registrar {
    config: GlobalConfig,
    catalog: Arc<Catalog>,
    git: GitDriver,
    /// Coarse lock held across add/remove of repository records.
    lock: Mutex<()>,
}

impl Registrar {
    pub fn new(config: GlobalConfig, catalog: Arc<Catalog>, git: GitDriver) -> Self {
        Self {
            config,
            catalog,
            git,
            lock: Mutex::new(()),
        }
    }

    /// Register a repository from a local path or a remote URL (SSH,
    /// HTTPS, or SCP form). URLs are cloned into the repositories base
    /// directory; an existing destination directory is rejected.
    pub async fn add(
        &self,
        source: &str,
        name: Option<String>,
        description: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Repository, VibemanError> {
        let _guard = self.lock.lock().await;

        let (name, path) = if is_remote_url(source) {
            let name = name.unwrap_or_else(|| derive_repo_name(source));
            let dest = self.config.storage.repositories_path.join(&name);
            if dest.exists() {
                return Err(VibemanError::already_exists(
                    "repository.add",
                    format!("directory {}", dest.display()),
                )
                .with_hint("remove the directory or register it as a local path"));
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!(url = source, dest = %dest.display(), "cloning repository");
            self.git.clone_repo(source, &dest, cancel).await?;
            (name, dest)
        } else {
            let path = Path::new(source)
                .canonicalize()
                .map_err(|_| {
                    VibemanError::validation(
                        "repository.add",
                        format!("path '{source}' does not exist"),
                    )
                })?;
            if !self.git.is_repository(&path) {
                return Err(VibemanError::validation(
                    "repository.add",
                    format!("{} is not a git repository", path.display()),
                ));
            }
            let name = name.unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "repository".to_string())
            });
            (name, path)
        };

        // Load or scaffold the per-repo config.
        let config_path = path.join(REPO_CONFIG_FILE);
        let repo_config = if config_path.exists() {
            RepoConfig::load(&config_path)?
        } else {
            let scaffold = RepoConfig::scaffold(&name);
            if let Err(e) = tokio::fs::write(&config_path, &scaffold).await {
                warn!(error = %e, "could not write {REPO_CONFIG_FILE} scaffold");
            }
            toml::from_str(&scaffold)?
        };

        let description = description.unwrap_or(repo_config.repository.description);
        let repo = self
            .catalog
            .create_repository(Repository::new(name, path, description))
            .await?;
        info!(repo = %repo.name, path = %repo.path.display(), "repository registered");
        Ok(repo)
    }

    /// Remove a repository record. Refuses while worktrees reference it
    /// unless forced; with force the worktree rows go too. Files on disk
    /// are never touched.
    pub async fn remove(&self, id_or_name: &str, force: bool) -> Result<Repository, VibemanError> {
        let _guard = self.lock.lock().await;

        let repo = self.resolve(id_or_name).await?;
        let worktrees = self.catalog.list_worktrees(Some(repo.id), None).await;
        if !worktrees.is_empty() {
            if !force {
                return Err(VibemanError::in_use(
                    "repository.remove",
                    format!(
                        "repository '{}' has {} worktree(s)",
                        repo.name,
                        worktrees.len()
                    ),
                ));
            }
            for worktree in worktrees {
                warn!(worktree = %worktree.name, "dropping worktree record with forced repository removal");
                self.catalog.delete_worktree(worktree.id).await?;
            }
        }
        self.catalog.delete_repository(repo.id).await?;
        info!(repo = %repo.name, "repository removed from catalog");
        Ok(repo)
    }

    pub async fn list(&self) -> Vec<Repository> {
        self.catalog.list_repositories().await
    }

    /// Accepts either a record id or a repository name.
    pub async fn resolve(&self, id_or_name: &str) -> Result<Repository, VibemanError> {
        if let Ok(id) = Uuid::parse_str(id_or_name) {
            if let Ok(repo) = self.catalog.get_repository(id).await {
                return Ok(repo);
            }
        }
        self.catalog.get_repository_by_name(id_or_name).await
    }
}

/// Remote sources: explicit schemes plus the SCP-like `user@host:path`
/// form git accepts.
pub fn is_remote_url(source: &str) -> bool {
    if source.starts_with("http://")
        || source.starts_with("https://")
        || source.starts_with("ssh://")
        || source.starts_with("git://")
    {
        return true;
    }
    if source.contains("://") {
        return false;
    }
    // SCP form: something@host:path, where the part before ':' is not a
    // filesystem path.
    match source.split_once(':') {
        Some((head, rest)) => !head.is_empty() && !rest.is_empty() && head.contains('@') && !head.contains('/'),
        None => false,
    }
}

/// Last path segment of a URL, with any `.git` suffix dropped.
pub fn derive_repo_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let tail = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    tail.strip_suffix(".git").unwrap_or(tail).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_detection() {
        assert!(is_remote_url("https://github.com/org/repo.git"));
        assert!(is_remote_url("http://example.com/repo"));
        assert!(is_remote_url("ssh://git@example.com/repo.git"));
        assert!(is_remote_url("git://example.com/repo.git"));
        assert!(is_remote_url("git@github.com:org/repo.git"));
    }

    #[test]
    fn test_local_paths_are_not_urls() {
        assert!(!is_remote_url("/home/user/repo"));
        assert!(!is_remote_url("./repo"));
        assert!(!is_remote_url("repo"));
        assert!(!is_remote_url("C:/repos/demo"));
        assert!(!is_remote_url("file://local/repo"));
    }

    #[test]
    fn test_derive_repo_name() {
        assert_eq!(derive_repo_name("https://github.com/org/myapp.git"), "myapp");
        assert_eq!(derive_repo_name("git@github.com:org/myapp.git"), "myapp");
        assert_eq!(derive_repo_name("https://example.com/deep/path/tool/"), "tool");
        assert_eq!(derive_repo_name("ssh://git@host/repo"), "repo");
    }
}
