//! Process-wide composition: the catalog, service registry and drivers
//! are built once here and injected into every component, never reached
//! through ambient scope. Tests construct the same pieces with fakes.

use crate::config::GlobalConfig;
use crate::error::VibemanError;
use crate::infra::catalog::Catalog;
use crate::infra::command::{CommandRunner, ShellCommandRunner};
use crate::infra::git::GitDriver;
use crate::infra::runtime::{ContainerRuntime, DockerComposeRuntime};
use crate::orchestrator::Orchestrator;
use crate::registrar::Registrar;
use crate::services::ServiceManager;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct App {
    pub config: GlobalConfig,
    pub catalog: Arc<Catalog>,
    pub git: GitDriver,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub services: Arc<ServiceManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub registrar: Registrar,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub async fn init(config: GlobalConfig) -> Result<Self, VibemanError> {
        tokio::fs::create_dir_all(&config.storage.state_path).await?;
        let catalog = Arc::new(Catalog::open(&config.storage.state_path).await?);
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellCommandRunner::new());
        let git = GitDriver::new(Arc::clone(&runner));
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerComposeRuntime::new(runner, config.timeouts.clone()));
        let services = Arc::new(ServiceManager::new(
            Arc::clone(&runtime),
            config.services.config_path.clone(),
            config.timeouts.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            Arc::clone(&catalog),
            git.clone(),
            Arc::clone(&runtime),
            Arc::clone(&services),
        ));
        let registrar = Registrar::new(config.clone(), Arc::clone(&catalog), git.clone());

        Ok(Self {
            config,
            catalog,
            git,
            runtime,
            services,
            orchestrator,
            registrar,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Start the long-running pieces: a startup reconciliation sweep and
    /// the service health poller. One-shot CLI invocations skip this.
    pub async fn start_background(&self) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let reconcile_cancel = self.shutdown.child_token();
        let mut background = self.background.lock().await;
        background.push(tokio::spawn(async move {
            if let Err(e) = orchestrator.reconcile(&reconcile_cancel).await {
                warn!(error = %e, "startup reconciliation failed");
            }
        }));
        background.push(self.services.spawn_health_poller(self.shutdown.child_token()));
    }

    /// Cancel background work and wait for it, bounded by the configured
    /// shutdown deadline.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut background = self.background.lock().await;
        let deadline = self.config.timeouts.shutdown();
        for handle in background.drain(..) {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                warn!("background task did not stop within the shutdown deadline");
            }
        }
    }
}
