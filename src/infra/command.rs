use crate::error::VibemanError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One external-binary invocation: argv, environment, working directory
/// and a deadline.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: None,
            envs: vec![],
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr, falling back to stdout when stderr is empty. Runtime CLIs
    /// are inconsistent about which stream carries the failure.
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// The one capability every external-binary invocation flows through, so
/// tests can substitute an in-memory fake and timeout/cancellation policy
/// lives in one place.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing stdout/stderr/exit. A non-zero exit is
    /// NOT an error at this layer; callers classify it.
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, VibemanError>;

    /// Spawn with piped stdout for streaming consumption (`logs --follow`).
    /// The child is killed when the returned handle is dropped.
    async fn spawn_streaming(&self, spec: CommandSpec) -> Result<Child, VibemanError>;
}

/// Production runner: `tokio::process::Command` with kill-on-drop so a
/// timeout or cancellation reaps the child.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Check a binary exists on PATH.
    pub fn is_available(program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn build(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> VibemanError {
        match e.kind() {
            std::io::ErrorKind::NotFound => VibemanError::runtime_unavailable(
                "command.spawn",
                format!("binary '{}' not found on PATH", spec.program),
            ),
            std::io::ErrorKind::PermissionDenied => VibemanError::new(
                crate::error::ErrorKind::PermissionDenied,
                "command.spawn",
                format!("not permitted to execute '{}'", spec.program),
            )
            .with_hint("run with elevated permissions"),
            _ => VibemanError::internal(
                "command.spawn",
                format!("failed to spawn '{}': {e}", spec.program),
            )
            .with_source(e),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, VibemanError> {
        debug!(command = %spec.display(), "running external command");
        let child = Self::build(&spec)
            .spawn()
            .map_err(|e| Self::spawn_error(&spec, e))?;

        let wait = child.wait_with_output();
        let output = if let Some(deadline) = spec.timeout {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Dropping the future kills the child (kill_on_drop).
                    return Err(VibemanError::timed_out(
                        "command.run",
                        format!("'{}' cancelled", spec.display()),
                    ));
                }
                result = tokio::time::timeout(deadline, wait) => result
                    .map_err(|_| VibemanError::timed_out(
                        "command.run",
                        format!("'{}' exceeded {deadline:?}", spec.display()),
                    ))?
                    .map_err(|e| Self::spawn_error(&spec, e))?,
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(VibemanError::timed_out(
                        "command.run",
                        format!("'{}' cancelled", spec.display()),
                    ));
                }
                result = wait => result.map_err(|e| Self::spawn_error(&spec, e))?,
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn spawn_streaming(&self, spec: CommandSpec) -> Result<Child, VibemanError> {
        debug!(command = %spec.display(), "spawning streaming command");
        Self::build(&spec)
            .spawn()
            .map_err(|e| Self::spawn_error(&spec, e))
    }
}
