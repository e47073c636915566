//! Shared fixtures: a temp git repository with a vibeman config, and an
//! in-memory container runtime standing in for Docker Compose.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vibeman::config::{GlobalConfig, TimeoutsConfig};
use vibeman::domain::repository::Repository;
use vibeman::error::VibemanError;
use vibeman::infra::catalog::Catalog;
use vibeman::infra::command::ShellCommandRunner;
use vibeman::infra::git::GitDriver;
use vibeman::infra::runtime::{
    ContainerInfo, ContainerRuntime, ContainerState, ExecOutput, LogOptions, LogStream, ProjectRef,
};
use vibeman::orchestrator::Orchestrator;
use vibeman::services::ServiceManager;

/// In-memory stand-in for Docker Compose: projects map to container
/// lists, `up` materializes one running container per service.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<HashMap<String, Vec<ContainerInfo>>>,
    fail_projects: Mutex<Vec<String>>,
    pub up_calls: Mutex<Vec<String>>,
    pub down_calls: Mutex<Vec<String>>,
    pub exec_calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `up` fail for one project name.
    pub fn fail_up_for(&self, project: &str) {
        self.fail_projects.lock().unwrap().push(project.to_string());
    }

    /// Simulate an operator removing every container of a project behind
    /// our back.
    pub fn wipe_project(&self, project: &str) {
        self.state.lock().unwrap().remove(project);
    }

    pub fn running_containers(&self, project: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .get(project)
            .map(|cs| {
                cs.iter()
                    .filter(|c| c.state == ContainerState::Running)
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up(
        &self,
        project: &ProjectRef,
        services: &[String],
        _cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        self.up_calls.lock().unwrap().push(project.project.clone());
        if self
            .fail_projects
            .lock()
            .unwrap()
            .contains(&project.project)
        {
            return Err(VibemanError::runtime_op("runtime.up", "compose up exited with 1"));
        }
        let names: Vec<String> = if services.is_empty() {
            vec!["app".to_string()]
        } else {
            services.to_vec()
        };
        let containers = names
            .iter()
            .map(|service| ContainerInfo {
                id: Uuid::new_v4().to_string(),
                name: format!("{}-{}", project.project, service),
                status: "Up 1 second".to_string(),
                state: ContainerState::Running,
                ports: vec![],
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .insert(project.project.clone(), containers);
        Ok(())
    }

    async fn down(
        &self,
        project: &ProjectRef,
        _remove_volumes: bool,
        _cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        self.down_calls.lock().unwrap().push(project.project.clone());
        self.state.lock().unwrap().remove(&project.project);
        Ok(())
    }

    async fn ps(
        &self,
        project: &ProjectRef,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, VibemanError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .get(&project.project)
            .cloned()
            .unwrap_or_default())
    }

    async fn logs(
        &self,
        _project: &ProjectRef,
        _service: Option<&str>,
        _opts: LogOptions,
    ) -> Result<LogStream, VibemanError> {
        Ok(LogStream::from_bytes(b"fake log line\n".to_vec()))
    }

    async fn exec(
        &self,
        _container_id: &str,
        argv: &[String],
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, VibemanError> {
        self.exec_calls.lock().unwrap().push(argv.to_vec());
        Ok(ExecOutput {
            stdout: vec![],
            exit_code: 0,
        })
    }
}

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A git repo on `main` with a vibeman config, a compose file and one
/// commit.
pub fn init_demo_repo(dir: &Path, declared_services: &str) {
    std::fs::create_dir_all(dir).unwrap();
    run_git(dir, &["init"]);
    run_git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(dir.join("README.md"), "# demo\n").unwrap();
    std::fs::write(
        dir.join("docker-compose.yml"),
        "services:\n  api:\n    image: demo/api:latest\n    ports:\n      - \"8080:3000\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("vibeman.toml"),
        format!(
            r#"[repository]
name = "demo"

[repository.container]
compose_file = "docker-compose.yml"
services = ["api"]

[repository.git]
default_branch = "main"
worktree_prefix = "worktree/"
{declared_services}
"#
        ),
    )
    .unwrap();
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-m", "initial commit"]);
}

/// The assembled core against a temp directory and the fake runtime.
pub struct TestCore {
    pub tmp: TempDir,
    pub config: GlobalConfig,
    pub catalog: Arc<Catalog>,
    pub git: GitDriver,
    pub runtime: Arc<FakeRuntime>,
    pub services: Arc<ServiceManager>,
    pub orchestrator: Orchestrator,
    pub repo: Repository,
}

impl TestCore {
    /// `declared_services`: extra `[repository.services]` TOML appended to
    /// the repo config, e.g. `"[repository.services]\npostgres = { required = true }"`.
    pub async fn new(declared_services: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("repos/demo");
        init_demo_repo(&repo_dir, declared_services);

        // Shared services registry.
        std::fs::write(
            tmp.path().join("services.toml"),
            "[services.postgres]\ncompose_file = \"stacks/postgres.yml\"\nservice = \"postgres\"\n\
             [services.redis]\ncompose_file = \"stacks/redis.yml\"\nservice = \"redis\"\n",
        )
        .unwrap();

        let mut config = GlobalConfig::default();
        config.storage.repositories_path = tmp.path().join("repos");
        config.storage.worktrees_path = tmp.path().join("worktrees");
        config.storage.state_path = tmp.path().join("state");
        config.services.config_path = tmp.path().join("services.toml");
        config.timeouts = TimeoutsConfig::default();

        let catalog = Arc::new(Catalog::open(&config.storage.state_path).await.unwrap());
        let git = GitDriver::new(Arc::new(ShellCommandRunner::new()));
        let runtime = FakeRuntime::new();
        let runtime_dyn: Arc<dyn ContainerRuntime> = runtime.clone();
        let services = Arc::new(ServiceManager::new(
            Arc::clone(&runtime_dyn),
            config.services.config_path.clone(),
            config.timeouts.clone(),
        ));
        let orchestrator = Orchestrator::new(
            config.clone(),
            Arc::clone(&catalog),
            git.clone(),
            runtime_dyn,
            Arc::clone(&services),
        );

        let repo = catalog
            .create_repository(Repository::new(
                "demo".to_string(),
                repo_dir,
                String::new(),
            ))
            .await
            .unwrap();

        Self {
            tmp,
            config,
            catalog,
            git,
            runtime,
            services,
            orchestrator,
            repo,
        }
    }

    pub fn worktree_dir(&self, name: &str) -> PathBuf {
        self.config
            .storage
            .worktrees_path
            .join("demo")
            .join(name)
    }
}
