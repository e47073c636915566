use thiserror::Error;

/// Error category. Determines retry policy, the HTTP status suggested to
/// the server adapter, and the CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    /// Current state forbids the operation (e.g. starting a worktree that
    /// is already starting).
    Conflict,
    /// Reference count > 0.
    InUse,
    ValidationFailed,
    GitFailed,
    ComposeInvalid,
    /// Runtime binary missing or daemon unreachable.
    RuntimeUnavailable,
    RuntimeOpFailed,
    PermissionDenied,
    TimedOut,
    Internal,
}

impl ErrorKind {
    /// Suggested HTTP status for the server adapter layer.
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::AlreadyExists | Self::Conflict | Self::InUse => 409,
            Self::ValidationFailed | Self::ComposeInvalid => 400,
            Self::PermissionDenied => 403,
            Self::RuntimeUnavailable => 503,
            Self::TimedOut => 504,
            Self::GitFailed | Self::RuntimeOpFailed | Self::Internal => 500,
        }
    }

    /// CLI exit code contract: 0 success, 1 generic, 2 not-found,
    /// 126 permission denied, 127 runtime binary missing.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::NotFound => 2,
            Self::PermissionDenied => 126,
            Self::RuntimeUnavailable => 127,
            _ => 1,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Conflict => "conflict",
            Self::InUse => "in use",
            Self::ValidationFailed => "validation failed",
            Self::GitFailed => "git failed",
            Self::ComposeInvalid => "compose invalid",
            Self::RuntimeUnavailable => "runtime unavailable",
            Self::RuntimeOpFailed => "runtime operation failed",
            Self::PermissionDenied => "permission denied",
            Self::TimedOut => "timed out",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Core error: a category, the operation that raised it, a one-line
/// message, an optional cause, and a remediation hint the CLI and API
/// adapters surface verbatim.
#[derive(Debug, Error)]
#[error("{op}: {message}")]
pub struct VibemanError {
    pub kind: ErrorKind,
    pub op: &'static str,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
    pub hint: Option<String>,
}

impl VibemanError {
    pub fn new(kind: ErrorKind, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            message: message.into(),
            source: None,
            hint: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn not_found(op: &'static str, what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, op, format!("{what} not found"))
            .with_hint("run `vibeman status` to see what is registered")
    }

    pub fn already_exists(op: &'static str, what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::AlreadyExists, op, format!("{what} already exists"))
    }

    pub fn conflict(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, op, message)
    }

    pub fn in_use(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InUse, op, message)
            .with_hint("pass --force to override, or release the holders first")
    }

    pub fn validation(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, op, message)
    }

    pub fn git(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GitFailed, op, message)
    }

    pub fn compose_invalid(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ComposeInvalid, op, message)
    }

    pub fn runtime_op(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeOpFailed, op, message)
    }

    pub fn runtime_unavailable(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeUnavailable, op, message)
            .with_hint("check that docker is installed and the daemon is running")
    }

    pub fn timed_out(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimedOut, op, message)
    }

    pub fn internal(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, op, message)
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl From<std::io::Error> for VibemanError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, "io", e.to_string()).with_source(e)
    }
}

impl From<git2::Error> for VibemanError {
    fn from(e: git2::Error) -> Self {
        Self::new(ErrorKind::GitFailed, "git", e.message().to_string()).with_source(e)
    }
}

impl From<serde_json::Error> for VibemanError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Internal, "json", e.to_string()).with_source(e)
    }
}

impl From<toml::de::Error> for VibemanError {
    fn from(e: toml::de::Error) -> Self {
        Self::new(ErrorKind::ValidationFailed, "config", e.to_string()).with_source(e)
    }
}
