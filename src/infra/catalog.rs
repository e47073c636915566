use crate::domain::repository::Repository;
use crate::domain::worktree::{Worktree, WorktreeStatus};
use crate::error::VibemanError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable record store for repositories and worktrees — the single
/// source of truth for identity.
///
/// One JSON document per record under
/// `<state-dir>/catalog/{repositories,worktrees}/<id>.json`, written
/// atomically (temp file + rename). The in-memory index behind an async
/// RwLock makes unique-name checks transactional and `list` a stable
/// snapshot. A record file that fails to parse poisons only itself: it is
/// skipped on load with a warning and surfaces as a typed error on `get`.
pub struct Catalog {
    repos_dir: PathBuf,
    worktrees_dir: PathBuf,
    inner: RwLock<Index>,
}

#[derive(Default)]
struct Index {
    repositories: HashMap<Uuid, Repository>,
    worktrees: HashMap<Uuid, Worktree>,
    corrupt_repositories: HashSet<Uuid>,
    corrupt_worktrees: HashSet<Uuid>,
}

impl Catalog {
    /// Open (creating directories as needed) and load every record.
    pub async fn open(state_dir: &Path) -> Result<Self, VibemanError> {
        let root = state_dir.join("catalog");
        let repos_dir = root.join("repositories");
        let worktrees_dir = root.join("worktrees");
        tokio::fs::create_dir_all(&repos_dir).await?;
        tokio::fs::create_dir_all(&worktrees_dir).await?;

        let mut index = Index::default();
        load_collection(&repos_dir, &mut index.repositories, &mut index.corrupt_repositories)
            .await?;
        load_collection(&worktrees_dir, &mut index.worktrees, &mut index.corrupt_worktrees)
            .await?;

        Ok(Self {
            repos_dir,
            worktrees_dir,
            inner: RwLock::new(index),
        })
    }

    // --- repositories ---

    pub async fn create_repository(&self, repo: Repository) -> Result<Repository, VibemanError> {
        let mut index = self.inner.write().await;
        if index.repositories.values().any(|r| r.name == repo.name) {
            return Err(VibemanError::already_exists(
                "catalog.repository.create",
                format!("repository '{}'", repo.name),
            ));
        }
        write_record(&self.repos_dir, repo.id, &repo).await?;
        index.repositories.insert(repo.id, repo.clone());
        Ok(repo)
    }

    pub async fn get_repository(&self, id: Uuid) -> Result<Repository, VibemanError> {
        let index = self.inner.read().await;
        if index.corrupt_repositories.contains(&id) {
            return Err(VibemanError::internal(
                "catalog.repository.get",
                format!("repository record {id} is unreadable"),
            )
            .with_hint("re-register the repository to repair the record"));
        }
        index
            .repositories
            .get(&id)
            .cloned()
            .ok_or_else(|| VibemanError::not_found("catalog.repository.get", format!("repository {id}")))
    }

    pub async fn get_repository_by_name(&self, name: &str) -> Result<Repository, VibemanError> {
        let index = self.inner.read().await;
        index
            .repositories
            .values()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| {
                VibemanError::not_found("catalog.repository.get", format!("repository '{name}'"))
            })
    }

    pub async fn list_repositories(&self) -> Vec<Repository> {
        let index = self.inner.read().await;
        let mut repos: Vec<_> = index.repositories.values().cloned().collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        repos
    }

    pub async fn update_repository(&self, repo: Repository) -> Result<(), VibemanError> {
        let mut index = self.inner.write().await;
        if !index.repositories.contains_key(&repo.id) {
            return Err(VibemanError::not_found(
                "catalog.repository.update",
                format!("repository {}", repo.id),
            ));
        }
        write_record(&self.repos_dir, repo.id, &repo).await?;
        index.repositories.insert(repo.id, repo);
        Ok(())
    }

    pub async fn delete_repository(&self, id: Uuid) -> Result<(), VibemanError> {
        let mut index = self.inner.write().await;
        index.repositories.remove(&id);
        index.corrupt_repositories.remove(&id);
        remove_record(&self.repos_dir, id).await
    }

    // --- worktrees ---

    pub async fn create_worktree(&self, worktree: Worktree) -> Result<Worktree, VibemanError> {
        let mut index = self.inner.write().await;
        let duplicate = index.worktrees.values().any(|w| {
            w.repository_id == worktree.repository_id && w.name == worktree.name
        });
        if duplicate {
            return Err(VibemanError::already_exists(
                "catalog.worktree.create",
                format!("worktree '{}'", worktree.name),
            ));
        }
        write_record(&self.worktrees_dir, worktree.id, &worktree).await?;
        index.worktrees.insert(worktree.id, worktree.clone());
        Ok(worktree)
    }

    pub async fn get_worktree(&self, id: Uuid) -> Result<Worktree, VibemanError> {
        let index = self.inner.read().await;
        if index.corrupt_worktrees.contains(&id) {
            return Err(VibemanError::internal(
                "catalog.worktree.get",
                format!("worktree record {id} is unreadable"),
            )
            .with_hint("remove and recreate the worktree to repair the record"));
        }
        index
            .worktrees
            .get(&id)
            .cloned()
            .ok_or_else(|| VibemanError::not_found("catalog.worktree.get", format!("worktree {id}")))
    }

    pub async fn get_worktree_by_name(
        &self,
        repository_id: Uuid,
        name: &str,
    ) -> Result<Worktree, VibemanError> {
        let index = self.inner.read().await;
        index
            .worktrees
            .values()
            .find(|w| w.repository_id == repository_id && w.name == name)
            .cloned()
            .ok_or_else(|| {
                VibemanError::not_found("catalog.worktree.get", format!("worktree '{name}'"))
            })
    }

    /// Stable snapshot, optionally filtered by repository and status,
    /// sorted by name.
    pub async fn list_worktrees(
        &self,
        repository_id: Option<Uuid>,
        status: Option<WorktreeStatus>,
    ) -> Vec<Worktree> {
        let index = self.inner.read().await;
        let mut worktrees: Vec<_> = index
            .worktrees
            .values()
            .filter(|w| repository_id.is_none_or(|id| w.repository_id == id))
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        worktrees.sort_by(|a, b| a.name.cmp(&b.name));
        worktrees
    }

    pub async fn update_worktree(&self, worktree: Worktree) -> Result<(), VibemanError> {
        let mut index = self.inner.write().await;
        if !index.worktrees.contains_key(&worktree.id) {
            return Err(VibemanError::not_found(
                "catalog.worktree.update",
                format!("worktree {}", worktree.id),
            ));
        }
        write_record(&self.worktrees_dir, worktree.id, &worktree).await?;
        index.worktrees.insert(worktree.id, worktree);
        Ok(())
    }

    pub async fn delete_worktree(&self, id: Uuid) -> Result<(), VibemanError> {
        let mut index = self.inner.write().await;
        index.worktrees.remove(&id);
        index.corrupt_worktrees.remove(&id);
        remove_record(&self.worktrees_dir, id).await
    }
}

async fn load_collection<T: serde::de::DeserializeOwned>(
    dir: &Path,
    records: &mut HashMap<Uuid, T>,
    corrupt: &mut HashSet<Uuid>,
) -> Result<(), VibemanError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            tracing::warn!(path = %path.display(), "skipping catalog file with non-uuid name");
            continue;
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(record) => {
                    records.insert(id, record);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt catalog record");
                    corrupt.insert(id);
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable catalog record");
                corrupt.insert(id);
            }
        }
    }
    Ok(())
}

/// Atomic write: temp file in the same directory, then rename.
async fn write_record<T: serde::Serialize>(
    dir: &Path,
    id: Uuid,
    record: &T,
) -> Result<(), VibemanError> {
    let json = serde_json::to_string_pretty(record)?;
    let target = dir.join(format!("{id}.json"));
    let tmp = dir.join(format!("{id}.json.tmp"));
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, &target).await?;
    Ok(())
}

async fn remove_record(dir: &Path, id: Uuid) -> Result<(), VibemanError> {
    let path = dir.join(format!("{id}.json"));
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::path::PathBuf;

    fn make_repo(name: &str) -> Repository {
        Repository::new(name.into(), PathBuf::from("/tmp/repo"), String::new())
    }

    fn make_worktree(repo_id: Uuid, name: &str) -> Worktree {
        Worktree::new(
            repo_id,
            name.into(),
            format!("worktree/{name}"),
            PathBuf::from(format!("/tmp/worktrees/{name}")),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_repository() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let repo = catalog.create_repository(make_repo("demo")).await.unwrap();
        assert_eq!(catalog.get_repository(repo.id).await.unwrap().name, "demo");
        assert_eq!(
            catalog.get_repository_by_name("demo").await.unwrap().id,
            repo.id
        );
    }

    #[tokio::test]
    async fn test_duplicate_repository_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        catalog.create_repository(make_repo("demo")).await.unwrap();
        let err = catalog.create_repository(make_repo("demo")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_duplicate_worktree_name_rejected_per_repo() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let a = catalog.create_repository(make_repo("a")).await.unwrap();
        let b = catalog.create_repository(make_repo("b")).await.unwrap();
        catalog.create_worktree(make_worktree(a.id, "feat-x")).await.unwrap();
        // same name under another repo is fine
        catalog.create_worktree(make_worktree(b.id, "feat-x")).await.unwrap();
        let err = catalog
            .create_worktree(make_worktree(a.id, "feat-x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let repo_id = {
            let catalog = Catalog::open(dir.path()).await.unwrap();
            let repo = catalog.create_repository(make_repo("demo")).await.unwrap();
            catalog
                .create_worktree(make_worktree(repo.id, "feat-x"))
                .await
                .unwrap();
            repo.id
        };
        let catalog = Catalog::open(dir.path()).await.unwrap();
        assert_eq!(catalog.get_repository(repo_id).await.unwrap().name, "demo");
        assert_eq!(catalog.list_worktrees(Some(repo_id), None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_does_not_poison_store() {
        let dir = tempfile::tempdir().unwrap();
        let (good, bad) = {
            let catalog = Catalog::open(dir.path()).await.unwrap();
            let good = catalog.create_repository(make_repo("good")).await.unwrap();
            let bad = catalog.create_repository(make_repo("bad")).await.unwrap();
            (good, bad)
        };
        // Corrupt one record on disk.
        let bad_path = dir
            .path()
            .join("catalog/repositories")
            .join(format!("{}.json", bad.id));
        std::fs::write(&bad_path, "{ not json").unwrap();

        let catalog = Catalog::open(dir.path()).await.unwrap();
        // The good record is intact and listed; the bad one is omitted
        // from list and typed on get.
        assert_eq!(catalog.get_repository(good.id).await.unwrap().name, "good");
        let listed = catalog.list_repositories().await;
        assert_eq!(listed.len(), 1);
        let err = catalog.get_repository(bad.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_update_and_filtered_list() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let repo = catalog.create_repository(make_repo("demo")).await.unwrap();
        let mut wt = catalog
            .create_worktree(make_worktree(repo.id, "feat-x"))
            .await
            .unwrap();
        assert_eq!(wt.status, WorktreeStatus::Starting);
        wt.status = WorktreeStatus::Running;
        catalog.update_worktree(wt.clone()).await.unwrap();

        let running = catalog
            .list_worktrees(Some(repo.id), Some(WorktreeStatus::Running))
            .await;
        assert_eq!(running.len(), 1);
        let stopped = catalog
            .list_worktrees(Some(repo.id), Some(WorktreeStatus::Stopped))
            .await;
        assert!(stopped.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let repo = catalog.create_repository(make_repo("demo")).await.unwrap();
        catalog.delete_repository(repo.id).await.unwrap();
        catalog.delete_repository(repo.id).await.unwrap();
        assert!(catalog.get_repository(repo.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let err = catalog.update_repository(make_repo("ghost")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
