//! Worktree lifecycle orchestration.
//!
//! Every operation here is a multi-step transaction across the catalog,
//! the git driver, the container runtime and the service manager — each
//! of which can fail mid-flight. Steps run as a straight-line sequence
//! with explicit compensation on failure; compensation ignores the
//! caller's cancellation and runs under its own bounded deadline so
//! partial state is cleaned up even when the caller walked away.
//!
//! This module is the only writer of the catalog's worktree records.

use crate::config::{GlobalConfig, RepoConfig};
use crate::domain::projection;
use crate::domain::repository::Repository;
use crate::domain::worktree::{validate_worktree_name, Worktree, WorktreeStatus};
use crate::error::VibemanError;
use crate::infra::catalog::Catalog;
use crate::infra::git::GitDriver;
use crate::infra::runtime::{ContainerInfo, ContainerRuntime, ContainerState, ProjectRef};
use crate::services::ServiceManager;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deadline for compensating actions, independent of the caller's
/// cancellation.
const COMPENSATION_DEADLINE: Duration = Duration::from_secs(30);

const LOG_SUBDIRS: &[&str] = &["build", "runtime", "tests", "debug"];

/// Inputs for `create_worktree`.
#[derive(Debug, Clone, Default)]
pub struct CreateWorktreeRequest {
    pub repository_id: Uuid,
    pub name: String,
    /// Branch to check out; when empty, `<prefix><name>` with the repo's
    /// configured worktree prefix.
    pub branch: Option<String>,
    pub base_branch: Option<String>,
    pub skip_setup: bool,
    /// When false the worktree is created and committed as `stopped`
    /// without touching services or containers.
    pub auto_start: bool,
    pub compose_file: Option<String>,
    pub compose_services: Option<Vec<String>>,
    pub post_scripts: Vec<String>,
}

impl CreateWorktreeRequest {
    pub fn new(repository_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            repository_id,
            name: name.into(),
            auto_start: true,
            ..Default::default()
        }
    }
}

/// Result of a lifecycle operation: the committed record plus any
/// non-fatal warnings accumulated along the way.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub worktree: Worktree,
    pub warnings: Vec<String>,
}

pub struct Orchestrator {
    config: GlobalConfig,
    catalog: Arc<Catalog>,
    git: GitDriver,
    runtime: Arc<dyn ContainerRuntime>,
    services: Arc<ServiceManager>,
    /// Serializes lifecycle operations per `(repository, worktree-name)`.
    /// Distinct worktrees proceed in parallel.
    op_locks: Mutex<HashMap<(Uuid, String), Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: GlobalConfig,
        catalog: Arc<Catalog>,
        git: GitDriver,
        runtime: Arc<dyn ContainerRuntime>,
        services: Arc<ServiceManager>,
    ) -> Self {
        Self {
            config,
            catalog,
            git,
            runtime,
            services,
            op_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn service_manager(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    async fn op_lock(&self, repository_id: Uuid, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.op_locks.lock().await;
        locks
            .entry((repository_id, name.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ------------------------------------------------------------------
    // create
    // ------------------------------------------------------------------

    pub async fn create_worktree(
        &self,
        request: CreateWorktreeRequest,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome, VibemanError> {
        // Validate before taking any lock or slot.
        validate_worktree_name(&request.name)
            .map_err(|msg| VibemanError::validation("worktree.create", msg))?;
        let repo = self.catalog.get_repository(request.repository_id).await?;

        let lock = self.op_lock(repo.id, &request.name).await;
        let _guard = lock.lock().await;

        let repo_config = RepoConfig::load_from_dir(&repo.path)?.unwrap_or_default();

        // Branch name: caller's verbatim, else prefix + worktree name.
        let branch = match &request.branch {
            Some(b) if !b.is_empty() => b.clone(),
            _ => format!("{}{}", repo_config.repository.git.worktree_prefix, request.name),
        };
        let target = self.worktree_path(&repo, &repo_config, &request.name);

        // Reserve the catalog slot; racing creates of the same name fail
        // here on the unique constraint.
        let mut record = Worktree::new(repo.id, request.name.clone(), branch.clone(), target.clone());
        record.compose_file = request.compose_file.clone();
        if !request.auto_start {
            record.status = WorktreeStatus::Stopped;
        }
        let worktree = self.catalog.create_worktree(record).await?;
        info!(repo = %repo.name, worktree = %worktree.name, branch = %branch, "creating worktree");

        match self
            .create_steps(&repo, &repo_config, worktree.clone(), &request, cancel)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err((err, comp)) => {
                self.compensate_create(&repo, &worktree, comp).await;
                Err(err)
            }
        }
    }

    /// Steps after the catalog slot is reserved. On error, returns how far
    /// we got so compensation can unwind exactly that much.
    async fn create_steps(
        &self,
        repo: &Repository,
        repo_config: &RepoConfig,
        mut worktree: Worktree,
        request: &CreateWorktreeRequest,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome, (VibemanError, CreateProgress)> {
        let mut progress = CreateProgress::default();
        let mut warnings = Vec::new();

        if worktree.path.exists() {
            return Err((
                VibemanError::conflict(
                    "worktree.create",
                    format!("path {} already exists", worktree.path.display()),
                )
                .with_hint("remove the directory or pick another worktree name"),
                progress,
            ));
        }

        // Git worktree on disk.
        let base = request
            .base_branch
            .clone()
            .or_else(|| repo_config.repository.git.default_branch.clone());
        if let Err(e) = self
            .git
            .create_worktree(&repo.path, &worktree.branch, &worktree.path, base.as_deref(), cancel)
            .await
        {
            return Err((e, progress));
        }
        progress.git_worktree = true;

        // Log tree and instruction file; failures are warnings only.
        if let Err(e) = self.seed_worktree_files(repo, &worktree).await {
            warn!(error = %e, "failed to seed worktree log tree");
            warnings.push(format!("log directory setup failed: {}", e.message));
        }

        if !request.auto_start {
            worktree.updated_at = Utc::now();
            if let Err(e) = self.catalog.update_worktree(worktree.clone()).await {
                return Err((e, progress));
            }
            return Ok(LifecycleOutcome { worktree, warnings });
        }

        // The config inside the new worktree decides compose file,
        // services and setup commands — the branch may differ from the
        // repo root.
        let worktree_config = match RepoConfig::load_from_dir(&worktree.path) {
            Ok(Some(config)) => config,
            Ok(None) => repo_config.clone(),
            Err(e) => return Err((e, progress)),
        };

        let compose_rel = request
            .compose_file
            .clone()
            .unwrap_or_else(|| worktree_config.repository.container.compose_file.clone());
        let compose_path = worktree.path.join(&compose_rel);
        if !compose_path.exists() {
            // Nothing to run: commit as stopped rather than claiming a
            // running state reconciliation would immediately flag.
            warn!(compose = %compose_path.display(), "no compose file in worktree, no containers");
            warnings.push(format!("no compose file at {compose_rel}, worktree created stopped"));
            worktree.status = WorktreeStatus::Stopped;
            worktree.updated_at = Utc::now();
            if let Err(e) = self.catalog.update_worktree(worktree.clone()).await {
                return Err((e, progress));
            }
            return Ok(LifecycleOutcome { worktree, warnings });
        }

        // Shared services. A required service that fails to start is
        // fatal; optional ones are deferred with a warning.
        let holder = holder_id(&repo.name, &worktree.name);
        for (service, required) in worktree_config.declared_services() {
            match self.services.start(service, cancel).await {
                Ok(()) => {
                    if let Err(e) = self.services.add_reference(service, &holder).await {
                        return Err((e, progress));
                    }
                    progress.service_refs.push(service.to_string());
                }
                Err(e) if required => {
                    return Err((
                        VibemanError::new(
                            e.kind,
                            "worktree.create",
                            format!("required service '{service}' failed to start: {}", e.message),
                        )
                        .with_hint("check `vibeman service list` and the service's compose file"),
                        progress,
                    ));
                }
                Err(e) => {
                    warn!(service, error = %e, "optional service unavailable, deferring");
                    warnings.push(format!("service '{service}' deferred: {}", e.message));
                }
            }
        }
        worktree.services = progress.service_refs.clone();

        // Compose up under the deterministic project name.
        let project = ProjectRef::new(
            &compose_path,
            projection::project_name(&repo.name, &worktree.name),
        );
        let compose_services = request
            .compose_services
            .clone()
            .unwrap_or_else(|| worktree_config.repository.container.services.clone());
        if let Err(e) = self.runtime.up(&project, &compose_services, cancel).await {
            return Err((
                VibemanError::new(
                    e.kind,
                    "worktree.create",
                    format!("compose up failed for project '{}': {}", project.project, e.message),
                ),
                progress,
            ));
        }
        progress.compose_up = Some(project.clone());

        // Setup commands run inside the primary container; failures are
        // logged but never roll the transaction back.
        if !request.skip_setup {
            let mut setup = worktree_config.repository.container.setup.clone();
            if let Some(init) = &worktree_config.repository.setup.worktree_init {
                setup.push(init.clone());
            }
            setup.extend(request.post_scripts.iter().cloned());
            self.run_setup_commands(&project, &setup, &mut warnings, cancel)
                .await;
        }

        // Commit.
        worktree.status = WorktreeStatus::Running;
        worktree.updated_at = Utc::now();
        if let Err(e) = self.catalog.update_worktree(worktree.clone()).await {
            return Err((e, progress));
        }
        info!(repo = %repo.name, worktree = %worktree.name, "worktree running");
        Ok(LifecycleOutcome { worktree, warnings })
    }

    /// Unwind a failed create in reverse order, under a fresh bounded
    /// context so cancellation of the caller cannot leave partial state.
    async fn compensate_create(&self, repo: &Repository, worktree: &Worktree, progress: CreateProgress) {
        let repo = repo.clone();
        let worktree = worktree.clone();
        let holder = holder_id(&repo.name, &worktree.name);
        let fresh = CancellationToken::new();

        let cleanup = async {
            if let Some(project) = &progress.compose_up {
                if let Err(e) = self.runtime.down(project, true, &fresh).await {
                    warn!(error = %e, "compensation: compose down failed");
                }
            }
            for service in &progress.service_refs {
                if let Err(e) = self.services.remove_reference(service, &holder).await {
                    warn!(service, error = %e, "compensation: reference release failed");
                }
            }
            let _ = self.delete_log_tree(&repo.name, &worktree.name).await;
            if progress.git_worktree {
                if let Err(e) = self.git.remove_worktree(&repo.path, &worktree.path, &fresh).await {
                    warn!(error = %e, "compensation: git worktree removal failed");
                }
                if worktree.path.exists() {
                    let _ = tokio::fs::remove_dir_all(&worktree.path).await;
                }
            }
            if let Err(e) = self.catalog.delete_worktree(worktree.id).await {
                warn!(error = %e, "compensation: catalog row removal failed");
            }
        };

        if tokio::time::timeout(COMPENSATION_DEADLINE, cleanup).await.is_err() {
            warn!(worktree = %worktree.name, "compensation exceeded its deadline");
        } else {
            debug!(worktree = %worktree.name, "create compensation complete");
        }
    }

    // ------------------------------------------------------------------
    // start / stop
    // ------------------------------------------------------------------

    pub async fn start_worktree(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome, VibemanError> {
        let mut worktree = self.catalog.get_worktree(id).await?;
        let repo = self.catalog.get_repository(worktree.repository_id).await?;
        let lock = self.op_lock(repo.id, &worktree.name).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent operation may have moved it.
        worktree = self.catalog.get_worktree(id).await?;
        if !matches!(worktree.status, WorktreeStatus::Stopped | WorktreeStatus::Error) {
            return Err(VibemanError::conflict(
                "worktree.start",
                format!("worktree '{}' is {}", worktree.name, worktree.status),
            ));
        }
        if !self.compose_path_for(&worktree).exists() {
            return Err(VibemanError::conflict(
                "worktree.start",
                format!("worktree '{}' has no compose file, nothing to start", worktree.name),
            )
            .with_hint("add a [repository.container] section to vibeman.toml in the worktree"));
        }

        self.transition(&mut worktree, WorktreeStatus::Starting).await?;
        let mut warnings = Vec::new();

        let result = self
            .start_steps(&repo, &mut worktree, &mut warnings, cancel)
            .await;
        match result {
            Ok(()) => {
                self.transition(&mut worktree, WorktreeStatus::Running).await?;
                Ok(LifecycleOutcome { worktree, warnings })
            }
            Err(e) => {
                let _ = self.transition(&mut worktree, WorktreeStatus::Error).await;
                Err(e)
            }
        }
    }

    async fn start_steps(
        &self,
        repo: &Repository,
        worktree: &mut Worktree,
        warnings: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        // Config may have changed since the last start.
        let config = RepoConfig::load_from_dir(&worktree.path)?
            .or(RepoConfig::load_from_dir(&repo.path)?)
            .unwrap_or_default();

        let holder = holder_id(&repo.name, &worktree.name);
        let mut referenced = Vec::new();
        for (service, required) in config.declared_services() {
            match self.services.start(service, cancel).await {
                Ok(()) => {
                    self.services.add_reference(service, &holder).await?;
                    referenced.push(service.to_string());
                }
                Err(e) if required => {
                    // Unwind this start's references before bailing.
                    for service in &referenced {
                        let _ = self.services.remove_reference(service, &holder).await;
                    }
                    return Err(VibemanError::new(
                        e.kind,
                        "worktree.start",
                        format!("required service '{service}' failed to start: {}", e.message),
                    ));
                }
                Err(e) => {
                    warnings.push(format!("service '{service}' deferred: {}", e.message));
                }
            }
        }
        worktree.services = referenced;

        let project = ProjectRef::new(
            self.compose_path_for(worktree),
            projection::project_name(&repo.name, &worktree.name),
        );
        self.runtime
            .up(&project, &config.repository.container.services, cancel)
            .await?;
        Ok(())
    }

    pub async fn stop_worktree(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome, VibemanError> {
        let worktree = self.catalog.get_worktree(id).await?;
        let repo = self.catalog.get_repository(worktree.repository_id).await?;
        let lock = self.op_lock(repo.id, &worktree.name).await;
        let _guard = lock.lock().await;
        self.stop_locked(&repo, id, cancel).await
    }

    async fn stop_locked(
        &self,
        repo: &Repository,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<LifecycleOutcome, VibemanError> {
        let mut worktree = self.catalog.get_worktree(id).await?;
        if worktree.status != WorktreeStatus::Running {
            return Err(VibemanError::conflict(
                "worktree.stop",
                format!("worktree '{}' is {}", worktree.name, worktree.status),
            ));
        }
        self.transition(&mut worktree, WorktreeStatus::Stopping).await?;

        // References go first so a concurrent in-use query never sees a
        // count backed by containers that are already gone.
        let holder = holder_id(&repo.name, &worktree.name);
        for service in std::mem::take(&mut worktree.services) {
            if let Err(e) = self.services.remove_reference(&service, &holder).await {
                warn!(service = %service, error = %e, "reference release failed during stop");
            }
        }

        let project = self.project_for(repo, &worktree);
        if let Err(e) = self.runtime.down(&project, false, cancel).await {
            let _ = self.transition(&mut worktree, WorktreeStatus::Error).await;
            return Err(e);
        }

        self.transition(&mut worktree, WorktreeStatus::Stopped).await?;
        info!(repo = %repo.name, worktree = %worktree.name, "worktree stopped");
        Ok(LifecycleOutcome {
            worktree,
            warnings: vec![],
        })
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    pub async fn remove_worktree(
        &self,
        id: Uuid,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, VibemanError> {
        let worktree = self.catalog.get_worktree(id).await?;
        let repo = self.catalog.get_repository(worktree.repository_id).await?;
        let lock = self.op_lock(repo.id, &worktree.name).await;
        let _guard = lock.lock().await;

        let worktree = self.catalog.get_worktree(id).await?;
        if worktree.status == WorktreeStatus::Running {
            match self.stop_locked(&repo, id, cancel).await {
                Ok(_) => {}
                Err(e) if force => warn!(error = %e, "stop failed, continuing forced removal"),
                Err(e) => return Err(e),
            }
        }

        // Safety checks: each is a warning; without --force any warning
        // aborts the removal.
        let warnings = self.removal_warnings(&worktree, &repo, cancel).await;
        if !warnings.is_empty() && !force {
            return Err(VibemanError::conflict(
                "worktree.remove",
                format!("refusing to remove '{}': {}", worktree.name, warnings.join("; ")),
            )
            .with_hint("re-run with --force to remove anyway"));
        }

        let project = self.project_for(&repo, &worktree);
        if let Err(e) = self.runtime.down(&project, true, cancel).await {
            if force {
                warn!(error = %e, "compose down failed, continuing forced removal");
            } else {
                return Err(e);
            }
        }

        self.git.remove_worktree(&repo.path, &worktree.path, cancel).await?;
        if worktree.path.exists() {
            tokio::fs::remove_dir_all(&worktree.path).await?;
        }
        if let Err(e) = self.delete_log_tree(&repo.name, &worktree.name).await {
            warn!(error = %e, "failed to delete log tree");
        }
        self.catalog.delete_worktree(worktree.id).await?;

        // Defensive: stop should already have released these.
        let holder = holder_id(&repo.name, &worktree.name);
        for service in &worktree.services {
            let _ = self.services.remove_reference(service, &holder).await;
        }

        info!(repo = %repo.name, worktree = %worktree.name, "worktree removed");
        Ok(warnings)
    }

    async fn removal_warnings(
        &self,
        worktree: &Worktree,
        repo: &Repository,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        if !worktree.path.exists() {
            return warnings;
        }
        match self.git.has_uncommitted_changes(&worktree.path, cancel).await {
            Ok(true) => warnings.push("worktree has uncommitted changes".to_string()),
            Ok(false) => {}
            Err(e) => warnings.push(format!("could not check working tree: {}", e.message)),
        }
        match self.git.has_unpushed_commits(&worktree.path, cancel).await {
            Ok(true) => warnings.push("branch has unpushed commits".to_string()),
            Ok(false) => {}
            Err(e) => warnings.push(format!("could not check unpushed commits: {}", e.message)),
        }
        match self
            .git
            .is_branch_merged(&repo.path, &worktree.branch, cancel)
            .await
        {
            Ok(false) => warnings.push(format!("branch '{}' is not merged", worktree.branch)),
            Ok(true) => {}
            Err(e) => warnings.push(format!("could not check merge status: {}", e.message)),
        }
        warnings
    }

    // ------------------------------------------------------------------
    // reconciliation
    // ------------------------------------------------------------------

    /// Compare every worktree record against observable runtime state and
    /// repair drift. The catalog is never assumed authoritative over what
    /// `ps` reports. Returns the ids of records that changed.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<Vec<Uuid>, VibemanError> {
        let mut changed = Vec::new();
        for mut worktree in self.catalog.list_worktrees(None, None).await {
            let Ok(repo) = self.catalog.get_repository(worktree.repository_id).await else {
                continue;
            };

            // A worktree whose directory (or git link) vanished cannot be
            // anything but broken, whatever the runtime says.
            let on_disk = worktree.path.exists() && worktree.path.join(".git").exists();
            if !on_disk
                && matches!(worktree.status, WorktreeStatus::Stopped | WorktreeStatus::Running)
            {
                warn!(worktree = %worktree.name, "worktree missing on disk, marking error");
                if self.force_status(&mut worktree, WorktreeStatus::Error).await {
                    changed.push(worktree.id);
                }
                continue;
            }

            let project = self.project_for(&repo, &worktree);
            let containers = match self.runtime.ps(&project, cancel).await {
                Ok(containers) => containers,
                Err(e) => {
                    debug!(worktree = %worktree.name, error = %e, "reconcile ps failed");
                    continue;
                }
            };
            let any_running = containers.iter().any(|c| c.state == ContainerState::Running);

            match (worktree.status, any_running) {
                (WorktreeStatus::Running, false) => {
                    info!(worktree = %worktree.name, "no containers alive, marking error");
                    if self.force_status(&mut worktree, WorktreeStatus::Error).await {
                        changed.push(worktree.id);
                    }
                }
                (WorktreeStatus::Stopped, true) => {
                    info!(worktree = %worktree.name, "containers alive, marking running");
                    if self.force_status(&mut worktree, WorktreeStatus::Running).await {
                        changed.push(worktree.id);
                    }
                }
                _ => {}
            }
        }
        Ok(changed)
    }

    /// Stream container logs for a worktree's project.
    pub async fn worktree_logs(
        &self,
        id: Uuid,
        service: Option<&str>,
        opts: crate::infra::runtime::LogOptions,
    ) -> Result<crate::infra::runtime::LogStream, VibemanError> {
        let worktree = self.catalog.get_worktree(id).await?;
        let repo = self.catalog.get_repository(worktree.repository_id).await?;
        self.runtime
            .logs(&self.project_for(&repo, &worktree), service, opts)
            .await
    }

    /// Containers of a worktree's project, for status display.
    pub async fn project_containers(
        &self,
        worktree: &Worktree,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, VibemanError> {
        let repo = self.catalog.get_repository(worktree.repository_id).await?;
        self.runtime.ps(&self.project_for(&repo, worktree), cancel).await
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    fn project_for(&self, repo: &Repository, worktree: &Worktree) -> ProjectRef {
        ProjectRef::new(
            self.compose_path_for(worktree),
            projection::project_name(&repo.name, &worktree.name),
        )
    }

    /// Compose file of a worktree: the recorded override from the create
    /// request, else whatever the config inside the worktree names.
    fn compose_path_for(&self, worktree: &Worktree) -> PathBuf {
        let compose_file = worktree.compose_file.clone().unwrap_or_else(|| {
            RepoConfig::load_from_dir(&worktree.path)
                .ok()
                .flatten()
                .map(|c| c.repository.container.compose_file)
                .unwrap_or_else(|| "docker-compose.yml".to_string())
        });
        worktree.path.join(compose_file)
    }

    /// Drift repair writes status outside the operation state machine —
    /// the runtime truth wins over whatever the record claims.
    async fn force_status(&self, worktree: &mut Worktree, status: WorktreeStatus) -> bool {
        worktree.status = status;
        worktree.updated_at = Utc::now();
        self.catalog.update_worktree(worktree.clone()).await.is_ok()
    }

    /// Resolution order for the worktree base directory: the repo's own
    /// config, then the global worktrees path (whose default is
    /// `$HOME/vibeman/worktrees`). Target is `<base>/<repo>/<name>`.
    fn worktree_path(&self, repo: &Repository, config: &RepoConfig, name: &str) -> PathBuf {
        let base = match &config.repository.worktrees.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo.path.join(dir),
            None => self.config.storage.worktrees_path.clone(),
        };
        base.join(&repo.name).join(name)
    }

    fn log_dir(&self, repo_name: &str, worktree_name: &str) -> PathBuf {
        self.config
            .storage
            .state_path
            .join("logs")
            .join(repo_name)
            .join(worktree_name)
    }

    async fn seed_worktree_files(
        &self,
        repo: &Repository,
        worktree: &Worktree,
    ) -> Result<(), VibemanError> {
        let log_root = self.log_dir(&repo.name, &worktree.name);
        for sub in LOG_SUBDIRS {
            let dir = log_root.join(sub);
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(format!("{sub}.log")), b"").await?;
        }
        let instructions = format!(
            "# Worktree: {name}\n\n\
             Repository `{repo}`, branch `{branch}`.\n\n\
             Containers for this worktree run in the compose project `{project}`.\n\
             Logs are collected under `{logs}`.\n",
            name = worktree.name,
            repo = repo.name,
            branch = worktree.branch,
            project = projection::project_name(&repo.name, &worktree.name),
            logs = log_root.display(),
        );
        tokio::fs::write(worktree.path.join("CLAUDE.md"), instructions).await?;
        Ok(())
    }

    async fn delete_log_tree(&self, repo_name: &str, worktree_name: &str) -> Result<(), VibemanError> {
        let dir = self.log_dir(repo_name, worktree_name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The single place worktree status changes. Rejects transitions the
    /// state machine does not allow.
    async fn transition(
        &self,
        worktree: &mut Worktree,
        next: WorktreeStatus,
    ) -> Result<(), VibemanError> {
        if !worktree.status.can_transition_to(next) {
            return Err(VibemanError::conflict(
                "worktree.transition",
                format!(
                    "illegal transition {} -> {} for worktree '{}'",
                    worktree.status, next, worktree.name
                ),
            ));
        }
        worktree.status = next;
        worktree.updated_at = Utc::now();
        self.catalog.update_worktree(worktree.clone()).await
    }

    async fn run_setup_commands(
        &self,
        project: &ProjectRef,
        commands: &[String],
        warnings: &mut Vec<String>,
        cancel: &CancellationToken,
    ) {
        if commands.is_empty() {
            return;
        }
        let containers = match self.runtime.ps(project, cancel).await {
            Ok(containers) => containers,
            Err(e) => {
                warnings.push(format!("setup skipped, ps failed: {}", e.message));
                return;
            }
        };
        let Some(primary) = containers.iter().find(|c| c.state == ContainerState::Running) else {
            warnings.push("setup skipped: no running container".to_string());
            return;
        };
        for command in commands {
            let argv = vec!["sh".to_string(), "-c".to_string(), command.clone()];
            match self.runtime.exec(&primary.id, &argv, cancel).await {
                Ok(out) if out.exit_code == 0 => {
                    debug!(command = %command, "setup command succeeded");
                }
                Ok(out) => {
                    warn!(command = %command, exit = out.exit_code, "setup command failed");
                    warnings.push(format!("setup '{command}' exited with {}", out.exit_code));
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "setup command errored");
                    warnings.push(format!("setup '{command}' failed: {}", e.message));
                }
            }
        }
    }
}

/// How far a create got, for exact unwinding.
#[derive(Debug, Default)]
struct CreateProgress {
    git_worktree: bool,
    service_refs: Vec<String>,
    compose_up: Option<ProjectRef>,
}

/// Identity a worktree uses when holding a shared-service reference.
pub fn holder_id(repo: &str, worktree: &str) -> String {
    format!("{repo}:{worktree}")
}
