//! Deterministic container and project naming.
//!
//! External tools rely on this convention to locate containers, so the
//! functions here must stay pure: the same inputs always produce the same
//! string.

/// Compose project name for a worktree: `<repo>-<worktree>`, or just
/// `<repo>` for the main worktree.
pub fn project_name(repository: &str, worktree: &str) -> String {
    if worktree.is_empty() || worktree == "main" {
        repository.to_string()
    } else {
        format!("{repository}-{worktree}")
    }
}

/// Container name for `(repository, worktree, compose-service)`:
/// `repo-worktree-service`, dropping the worktree segment for the main
/// worktree and the service segment when empty.
pub fn container_name(repository: &str, worktree: &str, service: &str) -> String {
    let mut name = project_name(repository, worktree);
    if !service.is_empty() {
        name.push('-');
        name.push_str(service);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_projection() {
        assert_eq!(container_name("demo", "feat-x", "api"), "demo-feat-x-api");
    }

    #[test]
    fn test_main_worktree_drops_segment() {
        assert_eq!(container_name("demo", "main", "api"), "demo-api");
        assert_eq!(container_name("demo", "", "api"), "demo-api");
    }

    #[test]
    fn test_empty_service_drops_segment() {
        assert_eq!(container_name("demo", "feat-x", ""), "demo-feat-x");
        assert_eq!(container_name("demo", "main", ""), "demo");
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name("demo", "feat-x"), "demo-feat-x");
        assert_eq!(project_name("demo", "main"), "demo");
        assert_eq!(project_name("demo", ""), "demo");
    }

    #[test]
    fn test_projection_is_pure() {
        for _ in 0..3 {
            assert_eq!(
                container_name("repo", "wt", "svc"),
                container_name("repo", "wt", "svc")
            );
        }
    }
}
