use crate::domain::service::ServiceDefinition;
use crate::error::VibemanError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global config: `<config-dir>/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub services: ServicesSection,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub webui_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            webui_port: 8081,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub repositories_path: PathBuf,
    pub worktrees_path: PathBuf,
    /// Catalog records and per-worktree log trees live here.
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        Self {
            repositories_path: home.join("vibeman").join("repos"),
            worktrees_path: home.join("vibeman").join("worktrees"),
            state_path: dirs::data_local_dir()
                .unwrap_or_else(|| home.join(".local").join("share"))
                .join("vibeman"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesSection {
    pub config_path: PathBuf,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            config_path: global_config_dir().join("services.toml"),
        }
    }
}

/// Deadlines for external invocations, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub compose_up_secs: u64,
    pub compose_down_secs: u64,
    pub exec_secs: u64,
    pub health_probe_secs: u64,
    pub shutdown_secs: u64,
    /// Health poller wake interval.
    pub health_interval_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            compose_up_secs: 120,
            compose_down_secs: 60,
            exec_secs: 30,
            health_probe_secs: 5,
            shutdown_secs: 30,
            health_interval_secs: 30,
        }
    }
}

impl TimeoutsConfig {
    pub fn compose_up(&self) -> Duration {
        Duration::from_secs(self.compose_up_secs)
    }
    pub fn compose_down(&self) -> Duration {
        Duration::from_secs(self.compose_down_secs)
    }
    pub fn exec(&self) -> Duration {
        Duration::from_secs(self.exec_secs)
    }
    pub fn health_probe(&self) -> Duration {
        Duration::from_secs(self.health_probe_secs)
    }
    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

impl GlobalConfig {
    /// Load from the default location, falling back to built-in defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, VibemanError> {
        Self::load_from(&global_config_dir().join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, VibemanError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            VibemanError::validation("config.load", format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: GlobalConfig = toml::from_str(&content)?;
        config.storage.repositories_path = expand_tilde(&config.storage.repositories_path);
        config.storage.worktrees_path = expand_tilde(&config.storage.worktrees_path);
        config.storage.state_path = expand_tilde(&config.storage.state_path);
        config.services.config_path = expand_tilde(&config.services.config_path);
        Ok(config)
    }
}

pub fn global_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("vibeman")
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Global services file (`services.toml`): named long-lived services that
/// worktrees attach to by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub compose_file: PathBuf,
    pub service: String,
    #[serde(default)]
    pub description: String,
}

impl ServicesFile {
    /// Load the services file; a missing file is an empty registry.
    /// Relative compose paths resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Vec<ServiceDefinition>, VibemanError> {
        if !path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            VibemanError::validation(
                "services.load",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        let file: ServicesFile = toml::from_str(&content)?;
        let base = path.parent().unwrap_or(Path::new("."));
        Ok(file
            .services
            .into_iter()
            .map(|(name, entry)| {
                let compose_file = expand_tilde(&entry.compose_file);
                let compose_file = if compose_file.is_absolute() {
                    compose_file
                } else {
                    base.join(compose_file)
                };
                ServiceDefinition {
                    name,
                    compose_file,
                    service: entry.service,
                    description: entry.description,
                }
            })
            .collect())
    }
}

/// Per-repository config: `vibeman.toml` at the repo root. Re-read from
/// inside each worktree so a branch can carry its own container setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub repository: RepositorySection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    pub name: String,
    pub description: String,
    pub container: ContainerSection,
    pub git: GitSection,
    pub worktrees: WorktreesSection,
    /// Shared services this repo's worktrees attach to.
    pub services: BTreeMap<String, ServiceRequirement>,
    pub setup: SetupSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    pub compose_file: String,
    /// Compose services to bring up; empty means all.
    pub services: Vec<String>,
    /// Commands run inside the primary container after `up`.
    pub setup: Vec<String>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            compose_file: "docker-compose.yml".into(),
            services: vec![],
            setup: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSection {
    pub repo_url: Option<String>,
    pub default_branch: Option<String>,
    pub worktree_prefix: String,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            repo_url: None,
            default_branch: None,
            worktree_prefix: "worktree/".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorktreesSection {
    /// Base directory for this repo's worktrees, relative to the repo
    /// root when not absolute.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRequirement {
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupSection {
    /// Script or inline command run once when a worktree is created.
    pub worktree_init: Option<String>,
}

pub const REPO_CONFIG_FILE: &str = "vibeman.toml";

impl RepoConfig {
    pub fn load(path: &Path) -> Result<Self, VibemanError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VibemanError::validation(
                "repo-config.load",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `vibeman.toml` from a directory, or `None` when absent.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, VibemanError> {
        let path = dir.join(REPO_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    /// Names of services declared by this repo, with the required flag.
    pub fn declared_services(&self) -> impl Iterator<Item = (&str, bool)> {
        self.repository
            .services
            .iter()
            .map(|(name, req)| (name.as_str(), req.required))
    }

    /// Minimal commented scaffold written by `repo add` when the repo has
    /// no config yet.
    pub fn scaffold(name: &str) -> String {
        format!(
            r#"[repository]
name = "{name}"
description = ""

[repository.container]
compose_file = "docker-compose.yml"
# services = ["api", "web"]   # empty means all
# setup = ["npm install"]

[repository.git]
default_branch = "main"
worktree_prefix = "worktree/"

# [repository.services]
# postgres = {{ required = true }}
"#
        )
    }
}
