use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One checked-out branch bound to one container project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub id: Uuid,
    pub repository_id: Uuid,
    /// Unique within the repository.
    pub name: String,
    pub branch: String,
    pub path: PathBuf,
    pub status: WorktreeStatus,
    /// Shared services this worktree holds references on. Recorded at
    /// create/start time so stop/remove release exactly what was taken.
    #[serde(default)]
    pub services: Vec<String>,
    /// Compose file override relative to the worktree root, when the
    /// create request named one explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl WorktreeStatus {
    /// Legal transitions of the lifecycle state machine. Record deletion
    /// (remove) is allowed from any state and is not modeled here.
    pub fn can_transition_to(self, next: WorktreeStatus) -> bool {
        use WorktreeStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Error)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Error)
                | (Error, Stopping)
                | (Stopped, Starting)
                | (Error, Starting)
        )
    }
}

impl std::fmt::Display for WorktreeStatus {
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

impl Worktree {
    pub fn new(repository_id: Uuid, name: String, branch: String, path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repository_id,
            name,
            branch,
            path,
            status: WorktreeStatus::Starting,
            services: vec![],
            compose_file: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorktreeStatus::Running
    }
}

/// Validate a worktree name: non-empty, at most 50 characters, none of
/// the filesystem- and shell-hostile characters.
pub fn validate_worktree_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("worktree name must not be empty".into());
    }
    if name.len() > 50 {
        return Err(format!("worktree name '{name}' exceeds 50 characters"));
    }
    const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', ' '];
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(format!("worktree name '{name}' contains forbidden character '{c}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use WorktreeStatus::*;
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Error));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Stopping.can_transition_to(Error));
        assert!(Error.can_transition_to(Stopping));
        assert!(Stopped.can_transition_to(Starting));
    }

    #[test]
    fn test_illegal_transitions() {
        use WorktreeStatus::*;
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Starting.can_transition_to(Stopping));
    }

    #[test]
    fn test_validate_name_rejects_forbidden_chars() {
        assert!(validate_worktree_name("feat-x").is_ok());
        assert!(validate_worktree_name("feat_x.2").is_ok());
        assert!(validate_worktree_name("").is_err());
        assert!(validate_worktree_name("a/b").is_err());
        assert!(validate_worktree_name("a b").is_err());
        assert!(validate_worktree_name("a:b").is_err());
        assert!(validate_worktree_name("a|b").is_err());
        assert!(validate_worktree_name(&"x".repeat(51)).is_err());
        assert!(validate_worktree_name(&"x".repeat(50)).is_ok());
    }

    #[test]
    fn test_serde_status_lowercase() {
        let json = serde_json::to_string(&WorktreeStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let status: WorktreeStatus = serde_json::from_str("\"stopping\"").unwrap();
        assert_eq!(status, WorktreeStatus::Stopping);
    }
}
