use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Declarative entry from the global services file (`services.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub compose_file: PathBuf,
    /// Service name inside the compose file.
    pub service: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Runtime state for a shared service. Process-memory only — rebuilt on
/// startup from the services file plus a probe of the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInstance {
    pub name: String,
    /// Empty when stopped.
    pub container_id: Option<String>,
    pub status: ServiceStatus,
    /// Holder identities, typically `"repository:worktree"`. The refcount
    /// is the size of this set, always.
    pub refs: BTreeSet<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Empty when the last probe succeeded.
    pub last_health_error: String,
}

impl ServiceInstance {
    pub fn new(name: String) -> Self {
        Self {
            name,
            container_id: None,
            status: ServiceStatus::Stopped,
            refs: BTreeSet::new(),
            start_time: None,
            last_health_check: None,
            last_health_error: String::new(),
        }
    }

    pub fn refcount(&self) -> usize {
        self.refs.len()
    }

    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }
}
