//! Shared Service Manager: a reference-counted registry of long-lived
//! compose-backed services (databases, caches) that many worktrees attach
//! to. Instances live in process memory only — the registry is rebuilt on
//! startup from the services file plus a probe of the runtime.

use crate::config::TimeoutsConfig;
use crate::domain::service::{ServiceDefinition, ServiceInstance, ServiceStatus};
use crate::error::VibemanError;
use crate::infra::runtime::{ContainerRuntime, ContainerState, ProjectRef};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One registered service: its definition, an operation lock serializing
/// start/stop/restart, and the instance state readable while an operation
/// is in flight. Reference mutations take only the state lock (the short
/// mode).
struct Slot {
    definition: ServiceDefinition,
    op_lock: Mutex<()>,
    state: RwLock<ServiceInstance>,
}

impl Slot {
    fn project(&self) -> ProjectRef {
        // Shared services run under the service name itself, not a
        // per-worktree project, so every worktree attaches to the same
        // containers.
        ProjectRef::new(&self.definition.compose_file, &self.definition.name)
    }
}

pub struct ServiceManager {
    runtime: Arc<dyn ContainerRuntime>,
    services_path: PathBuf,
    timeouts: TimeoutsConfig,
    registry: RwLock<Option<HashMap<String, Arc<Slot>>>>,
}

impl ServiceManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        services_path: PathBuf,
        timeouts: TimeoutsConfig,
    ) -> Self {
        Self {
            runtime,
            services_path,
            timeouts,
            registry: RwLock::new(None),
        }
    }

    /// Load the services file on first use and reconcile each instance
    /// against what the runtime actually reports.
    async fn ensure_loaded(&self) -> Result<(), VibemanError> {
        {
            let registry = self.registry.read().await;
            if registry.is_some() {
                return Ok(());
            }
        }
        let mut registry = self.registry.write().await;
        if registry.is_some() {
            return Ok(());
        }
        let definitions = crate::config::ServicesFile::load(&self.services_path)?;
        info!(count = definitions.len(), "loaded service definitions");
        let mut slots = HashMap::new();
        for definition in definitions {
            let name = definition.name.clone();
            slots.insert(
                name.clone(),
                Arc::new(Slot {
                    state: RwLock::new(ServiceInstance::new(name)),
                    op_lock: Mutex::new(()),
                    definition,
                }),
            );
        }
        *registry = Some(slots);
        drop(registry);

        // Probe outside the registry lock so list() stays responsive.
        let slots = self.slots().await;
        let cancel = CancellationToken::new();
        for slot in slots {
            if let Err(e) = self.refresh_from_runtime(&slot, &cancel).await {
                warn!(service = %slot.definition.name, error = %e, "initial service probe failed");
            }
        }
        Ok(())
    }

    async fn slots(&self) -> Vec<Arc<Slot>> {
        let registry = self.registry.read().await;
        registry
            .as_ref()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn slot(&self, name: &str) -> Result<Arc<Slot>, VibemanError> {
        self.ensure_loaded().await?;
        let registry = self.registry.read().await;
        registry
            .as_ref()
            .and_then(|m| m.get(name))
            .cloned()
            .ok_or_else(|| VibemanError::not_found("service.get", format!("service '{name}'")))
    }

    /// Overwrite instance status/container-id from a runtime probe.
    async fn refresh_from_runtime(
        &self,
        slot: &Slot,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        let containers = self.runtime.ps(&slot.project(), cancel).await?;
        let running = containers
            .iter()
            .find(|c| c.state == ContainerState::Running);
        let mut state = slot.state.write().await;
        match running {
            Some(container) => {
                state.status = ServiceStatus::Running;
                state.container_id = Some(container.id.clone());
                if state.start_time.is_none() {
                    state.start_time = Some(Utc::now());
                }
            }
            None => {
                state.status = ServiceStatus::Stopped;
                state.container_id = None;
                state.start_time = None;
            }
        }
        Ok(())
    }

    /// Start a service. A running service is a no-op success.
    pub async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<(), VibemanError> {
        let slot = self.slot(name).await?;
        let guard = slot.op_lock.lock().await;
        self.start_locked(&slot, &guard, cancel).await
    }

    async fn start_locked(
        &self,
        slot: &Slot,
        _guard: &MutexGuard<'_, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        {
            let state = slot.state.read().await;
            if state.status == ServiceStatus::Running {
                debug!(service = %state.name, "service already running");
                return Ok(());
            }
        }
        slot.state.write().await.status = ServiceStatus::Starting;
        info!(service = %slot.definition.name, "starting shared service");

        let services = vec![slot.definition.service.clone()];
        match self.runtime.up(&slot.project(), &services, cancel).await {
            Ok(()) => {}
            Err(e) => {
                let mut state = slot.state.write().await;
                state.status = ServiceStatus::Error;
                state.last_health_error = e.message.clone();
                return Err(e);
            }
        }

        // Record the container backing the instance. Running without a
        // container id would be a contradiction, so a probe failure here
        // fails the start.
        let probe = self.runtime.ps(&slot.project(), cancel).await.map(|containers| {
            containers
                .into_iter()
                .find(|c| c.state == ContainerState::Running)
                .map(|c| c.id)
        });
        let mut state = slot.state.write().await;
        match probe {
            Ok(Some(id)) => {
                state.status = ServiceStatus::Running;
                state.container_id = Some(id);
                state.start_time = Some(Utc::now());
                state.last_health_error.clear();
                Ok(())
            }
            Ok(None) => {
                state.status = ServiceStatus::Error;
                state.last_health_error = "no running container after up".into();
                Err(VibemanError::runtime_op(
                    "service.start",
                    format!("service '{}' has no running container after up", state.name),
                ))
            }
            Err(e) => {
                state.status = ServiceStatus::Error;
                state.last_health_error = e.message.clone();
                Err(e)
            }
        }
    }

    /// Stop a service. Refuses with `InUse` while references exist unless
    /// forced. The refset is kept — callers are expected to have released.
    pub async fn stop(
        &self,
        name: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        let slot = self.slot(name).await?;
        let guard = slot.op_lock.lock().await;
        self.stop_locked(&slot, &guard, force, cancel).await
    }

    async fn stop_locked(
        &self,
        slot: &Slot,
        _guard: &MutexGuard<'_, ()>,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        {
            let state = slot.state.read().await;
            let refcount = state.refcount();
            if refcount > 0 && !force {
                return Err(VibemanError::in_use(
                    "service.stop",
                    format!(
                        "service '{}' is referenced by {refcount} worktree(s)",
                        state.name
                    ),
                ));
            }
            if state.status == ServiceStatus::Stopped {
                return Ok(());
            }
        }
        slot.state.write().await.status = ServiceStatus::Stopping;
        info!(service = %slot.definition.name, "stopping shared service");

        match self.runtime.down(&slot.project(), false, cancel).await {
            Ok(()) => {
                let mut state = slot.state.write().await;
                state.status = ServiceStatus::Stopped;
                state.container_id = None;
                state.start_time = None;
                Ok(())
            }
            Err(e) => {
                let mut state = slot.state.write().await;
                state.status = ServiceStatus::Error;
                state.last_health_error = e.message.clone();
                Err(e)
            }
        }
    }

    /// Stop (forced) then start, serialized against any concurrent
    /// start/stop of the same service.
    pub async fn restart(&self, name: &str, cancel: &CancellationToken) -> Result<(), VibemanError> {
        let slot = self.slot(name).await?;
        let guard = slot.op_lock.lock().await;
        self.stop_locked(&slot, &guard, true, cancel).await?;
        self.start_locked(&slot, &guard, cancel).await
    }

    /// Register a holder. Idempotent; does not start the service — the
    /// orchestrator orders start before ref.
    pub async fn add_reference(&self, name: &str, holder: &str) -> Result<(), VibemanError> {
        let slot = self.slot(name).await?;
        let mut state = slot.state.write().await;
        if state.refs.insert(holder.to_string()) {
            debug!(service = name, holder, refcount = state.refcount(), "reference added");
        }
        Ok(())
    }

    /// Release a holder. Idempotent. Never stops the service — the last
    /// release leaves it running idle until an explicit stop.
    pub async fn remove_reference(&self, name: &str, holder: &str) -> Result<(), VibemanError> {
        let slot = self.slot(name).await?;
        let mut state = slot.state.write().await;
        if state.refs.remove(holder) {
            debug!(service = name, holder, refcount = state.refcount(), "reference removed");
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<ServiceInstance, VibemanError> {
        let slot = self.slot(name).await?;
        let state = slot.state.read().await;
        Ok(state.clone())
    }

    /// Snapshot of every instance, sorted by name.
    pub async fn list(&self) -> Result<Vec<ServiceInstance>, VibemanError> {
        self.ensure_loaded().await?;
        let mut instances = Vec::new();
        for slot in self.slots().await {
            instances.push(slot.state.read().await.clone());
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    pub async fn definition(&self, name: &str) -> Result<ServiceDefinition, VibemanError> {
        let slot = self.slot(name).await?;
        Ok(slot.definition.clone())
    }

    /// Probe liveness with a trivial exec in the service's container.
    /// Failures are recorded, never propagated as status changes.
    pub async fn health_check(&self, name: &str) -> Result<(), VibemanError> {
        let slot = self.slot(name).await?;
        let container_id = {
            let state = slot.state.read().await;
            if state.status == ServiceStatus::Running {
                state.container_id.clone()
            } else {
                None
            }
        };
        let Some(container_id) = container_id else {
            let mut state = slot.state.write().await;
            state.last_health_check = Some(Utc::now());
            state.last_health_error = "service is not running".into();
            return Ok(());
        };

        let cancel = CancellationToken::new();
        let probe = tokio::time::timeout(
            self.timeouts.health_probe(),
            self.runtime
                .exec(&container_id, &["true".to_string()], &cancel),
        )
        .await;

        let mut state = slot.state.write().await;
        state.last_health_check = Some(Utc::now());
        state.last_health_error = match probe {
            Ok(Ok(out)) if out.exit_code == 0 => String::new(),
            Ok(Ok(out)) => format!("health probe exited with code {}", out.exit_code),
            Ok(Err(e)) => e.message.clone(),
            Err(_) => "health probe timed out".into(),
        };
        Ok(())
    }

    /// Background worker: probe every running service on an interval
    /// until cancelled. Takes only service locks.
    pub fn spawn_health_poller(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.timeouts.health_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("health poller shutting down");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                let Ok(instances) = manager.list().await else {
                    continue;
                };
                for instance in instances {
                    if instance.status != ServiceStatus::Running {
                        continue;
                    }
                    if let Err(e) = manager.health_check(&instance.name).await {
                        warn!(service = %instance.name, error = %e, "health check failed");
                    }
                }
            }
        })
    }
}
