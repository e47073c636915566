use crate::config::TimeoutsConfig;
use crate::error::{ErrorKind, VibemanError};
use crate::infra::command::{CommandOutput, CommandRunner, CommandSpec, ShellCommandRunner};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Normalized container state. The runtime reports freeform strings
/// ("Up 3 minutes", "Exited (0)", "created"); everything funnels through
/// [`normalize_container_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Starting,
    Error,
}

/// Case-insensitive substring normalization: "up"/"running" are running,
/// "exited"/"created" are stopped, "restarting" is starting, anything
/// else is an error.
pub fn normalize_container_status(raw: &str) -> ContainerState {
    let s = raw.to_ascii_lowercase();
    if s.contains("restarting") {
        ContainerState::Starting
    } else if s.contains("exited") || s.contains("created") {
        ContainerState::Stopped
    } else if s.contains("up") || s.contains("running") {
        ContainerState::Running
    } else {
        ContainerState::Error
    }
}

/// A Compose invocation target: one compose file under one explicit
/// project name. The project name is what isolates worktrees from each
/// other even when they share a compose file.
#[derive(Debug, Clone)]
pub struct ProjectRef {
    pub compose_file: PathBuf,
    pub project: String,
}

impl ProjectRef {
    pub fn new(compose_file: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            compose_file: compose_file.into(),
            project: project.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Raw status string as reported by the runtime.
    pub status: String,
    pub state: ContainerState,
    /// `"host:container"` bindings.
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub follow: bool,
    pub tail: Option<u32>,
    pub since: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub exit_code: i32,
}

/// Byte stream of container logs. Owns the child process (when backed by
/// one) so dropping the stream reaps it.
pub struct LogStream {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    _child: Option<Child>,
}

impl LogStream {
    pub fn from_child(mut child: Child) -> Result<Self, VibemanError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VibemanError::internal("runtime.logs", "child has no stdout pipe"))?;
        Ok(Self {
            inner: Box::pin(stdout),
            _child: Some(child),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            inner: Box::pin(std::io::Cursor::new(bytes)),
            _child: None,
        }
    }
}

impl AsyncRead for LogStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

/// The container-runtime capability. Backed by Docker Compose in
/// production and by an in-memory fake in tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start some or all services of the project, detached. Idempotent:
    /// already-running services are a no-op.
    async fn up(
        &self,
        project: &ProjectRef,
        services: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError>;

    /// Stop and remove the project's containers. This is also the removal
    /// step; there is no separate "remove containers" operation.
    async fn down(
        &self,
        project: &ProjectRef,
        remove_volumes: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError>;

    /// List the project's containers, including stopped ones.
    async fn ps(
        &self,
        project: &ProjectRef,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, VibemanError>;

    /// Stream logs for one service (or the whole project when empty).
    async fn logs(
        &self,
        project: &ProjectRef,
        service: Option<&str>,
        opts: LogOptions,
    ) -> Result<LogStream, VibemanError>;

    /// Run argv inside a container; returns stdout bytes and the exit code.
    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, VibemanError>;
}

/// Docker Compose driver: every invocation is
/// `docker compose -f <file> -p <project> …`.
pub struct DockerComposeRuntime {
    runner: Arc<dyn CommandRunner>,
    timeouts: TimeoutsConfig,
}

impl DockerComposeRuntime {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: TimeoutsConfig) -> Self {
        Self { runner, timeouts }
    }

    /// The runtime binary is present on PATH.
    pub fn binary_available() -> bool {
        ShellCommandRunner::is_available("docker")
    }

    /// The daemon answers. Used by preflight checks; dependent operations
    /// refuse to start when this fails.
    pub async fn daemon_available(&self, cancel: &CancellationToken) -> bool {
        let spec = CommandSpec::new("docker")
            .args(["info", "--format", "{{.ServerVersion}}"])
            .timeout(std::time::Duration::from_secs(10));
        matches!(self.runner.run(spec, cancel).await, Ok(out) if out.success())
    }

    fn compose_spec(&self, project: &ProjectRef) -> CommandSpec {
        CommandSpec::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(project.compose_file.to_string_lossy())
            .arg("-p")
            .arg(project.project.clone())
    }

    fn check(op: &'static str, out: &CommandOutput) -> Result<(), VibemanError> {
        if out.success() {
            Ok(())
        } else {
            Err(classify_runtime_error(op, out.error_text()))
        }
    }
}

/// Map the runtime's stderr to the error taxonomy. The orchestrator uses
/// the category to decide between retry and compensation.
fn classify_runtime_error(op: &'static str, stderr: &str) -> VibemanError {
    let lower = stderr.to_ascii_lowercase();
    let kind = if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("docker daemon is not running")
    {
        ErrorKind::RuntimeUnavailable
    } else if lower.contains("permission denied") {
        ErrorKind::PermissionDenied
    } else if lower.contains("no such container") || lower.contains("no such service") {
        ErrorKind::NotFound
    } else if lower.contains("port is already allocated")
        || lower.contains("address already in use")
        || (lower.contains("network") && lower.contains("conflict"))
    {
        ErrorKind::Conflict
    } else if lower.contains("yaml") || lower.contains("no configuration file provided") {
        ErrorKind::ComposeInvalid
    } else {
        ErrorKind::RuntimeOpFailed
    };
    let err = VibemanError::new(kind, op, stderr.lines().next().unwrap_or("runtime operation failed").to_string());
    match kind {
        ErrorKind::RuntimeUnavailable => {
            err.with_hint("check that docker is installed and the daemon is running")
        }
        ErrorKind::PermissionDenied => err.with_hint("run with elevated permissions"),
        _ => err,
    }
}

/// One line of `docker compose ps --format json`.
#[derive(Debug, Deserialize)]
struct PsItem {
    #[serde(default, alias = "ID")]
    id: String,
    #[serde(default, alias = "Name")]
    name: String,
    #[serde(default, alias = "State")]
    state: String,
    #[serde(default, alias = "Status")]
    status: String,
    #[serde(default, alias = "Publishers")]
    publishers: Option<Vec<Publisher>>,
}

#[derive(Debug, Deserialize)]
struct Publisher {
    #[serde(default, alias = "PublishedPort")]
    published_port: u16,
    #[serde(default, alias = "TargetPort")]
    target_port: u16,
}

fn parse_ps_output(stdout: &str) -> Vec<ContainerInfo> {
    // Newer compose emits one JSON object per line; older emits an array.
    let items: Vec<PsItem> = if stdout.trim_start().starts_with('[') {
        serde_json::from_str(stdout).unwrap_or_default()
    } else {
        stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    };
    items
        .into_iter()
        .filter(|item| !item.id.is_empty() || !item.name.is_empty())
        .map(|item| {
            let raw_status = if item.status.is_empty() {
                item.state.clone()
            } else {
                item.status.clone()
            };
            ContainerInfo {
                state: normalize_container_status(&raw_status),
                id: item.id,
                name: item.name,
                status: raw_status,
                ports: item
                    .publishers
                    .unwrap_or_default()
                    .iter()
                    .filter(|p| p.published_port != 0)
                    .map(|p| format!("{}:{}", p.published_port, p.target_port))
                    .collect(),
            }
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerComposeRuntime {
    async fn up(
        &self,
        project: &ProjectRef,
        services: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        debug!(project = %project.project, ?services, "compose up");
        let spec = self
            .compose_spec(project)
            .args(["up", "-d"])
            .args(services.iter().cloned())
            .timeout(self.timeouts.compose_up());
        let out = self.runner.run(spec, cancel).await?;
        Self::check("runtime.up", &out)
    }

    async fn down(
        &self,
        project: &ProjectRef,
        remove_volumes: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VibemanError> {
        debug!(project = %project.project, remove_volumes, "compose down");
        let mut spec = self.compose_spec(project).arg("down");
        if remove_volumes {
            spec = spec.arg("--volumes");
        }
        let out = self
            .runner
            .run(spec.timeout(self.timeouts.compose_down()), cancel)
            .await?;
        Self::check("runtime.down", &out)
    }

    async fn ps(
        &self,
        project: &ProjectRef,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, VibemanError> {
        let spec = self
            .compose_spec(project)
            .args(["ps", "-a", "--format", "json"])
            .timeout(std::time::Duration::from_secs(30));
        let out = self.runner.run(spec, cancel).await?;
        Self::check("runtime.ps", &out)?;
        Ok(parse_ps_output(&out.stdout))
    }

    async fn logs(
        &self,
        project: &ProjectRef,
        service: Option<&str>,
        opts: LogOptions,
    ) -> Result<LogStream, VibemanError> {
        let mut spec = self.compose_spec(project).arg("logs");
        if opts.follow {
            spec = spec.arg("--follow");
        }
        if let Some(tail) = opts.tail {
            spec = spec.args(["--tail", &tail.to_string()]);
        }
        if let Some(since) = &opts.since {
            spec = spec.args(["--since", since]);
        }
        if let Some(service) = service {
            spec = spec.arg(service);
        }
        let child = self.runner.spawn_streaming(spec).await?;
        LogStream::from_child(child)
    }

    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, VibemanError> {
        let spec = CommandSpec::new("docker")
            .arg("exec")
            .arg(container_id)
            .args(argv.iter().cloned())
            .timeout(self.timeouts.exec());
        let out = self.runner.run(spec, cancel).await?;
        // A non-zero exit from the command inside the container is a
        // result, not a driver failure.
        Ok(ExecOutput {
            stdout: out.stdout.into_bytes(),
            exit_code: out.exit_code,
        })
    }
}
