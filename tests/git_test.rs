//! Git driver against real repositories in temp directories.

mod common;

use common::{init_demo_repo, run_git};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vibeman::error::ErrorKind;
use vibeman::infra::command::ShellCommandRunner;
use vibeman::infra::git::GitDriver;

fn driver() -> GitDriver {
    GitDriver::new(Arc::new(ShellCommandRunner::new()))
}

#[tokio::test]
async fn test_is_repository() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    assert!(git.is_repository(&repo));
    assert!(!git.is_repository(tmp.path()));
}

#[tokio::test]
async fn test_default_branch_detection() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    assert_eq!(driver().default_branch(&repo), "main");
}

#[tokio::test]
async fn test_create_list_remove_worktree() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    let cancel = CancellationToken::new();
    let wt_path = tmp.path().join("worktrees/feat-x");

    git.create_worktree(&repo, "worktree/feat-x", &wt_path, None, &cancel)
        .await
        .unwrap();
    assert!(wt_path.join("README.md").exists());

    let listed = git.list_worktrees(&repo, &cancel).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|w| w.branch == "worktree/feat-x"));
    assert!(listed.iter().all(|w| !w.commit.is_empty()));

    git.remove_worktree(&repo, &wt_path, &cancel).await.unwrap();
    let listed = git.list_worktrees(&repo, &cancel).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_remove_tolerates_directory_already_gone() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    let cancel = CancellationToken::new();
    let wt_path = tmp.path().join("worktrees/feat-x");

    git.create_worktree(&repo, "worktree/feat-x", &wt_path, None, &cancel)
        .await
        .unwrap();
    std::fs::remove_dir_all(&wt_path).unwrap();

    git.remove_worktree(&repo, &wt_path, &cancel).await.unwrap();
    assert_eq!(git.list_worktrees(&repo, &cancel).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_branch_checked_out_elsewhere_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    let cancel = CancellationToken::new();

    git.create_worktree(
        &repo,
        "worktree/feat-x",
        &tmp.path().join("worktrees/one"),
        None,
        &cancel,
    )
    .await
    .unwrap();

    let err = git
        .create_worktree(
            &repo,
            "worktree/feat-x",
            &tmp.path().join("worktrees/two"),
            None,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn test_existing_unattached_branch_is_reused() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    run_git(&repo, &["branch", "existing"]);
    let git = driver();
    let cancel = CancellationToken::new();
    let wt_path = tmp.path().join("worktrees/feat-x");

    git.create_worktree(&repo, "existing", &wt_path, None, &cancel)
        .await
        .unwrap();
    assert_eq!(
        git.current_branch(&wt_path, &cancel).await.unwrap(),
        "existing"
    );
}

#[tokio::test]
async fn test_dirty_state_predicates() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    let cancel = CancellationToken::new();

    assert!(!git.has_uncommitted_changes(&repo, &cancel).await.unwrap());
    std::fs::write(repo.join("scratch.txt"), "wip").unwrap();
    assert!(git.has_uncommitted_changes(&repo, &cancel).await.unwrap());

    // No remotes: nothing counts as unpushed.
    assert!(!git.has_unpushed_commits(&repo, &cancel).await.unwrap());
}

#[tokio::test]
async fn test_branch_merge_detection() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    let cancel = CancellationToken::new();
    let wt_path = tmp.path().join("worktrees/feat-x");

    git.create_worktree(&repo, "worktree/feat-x", &wt_path, None, &cancel)
        .await
        .unwrap();
    // Fresh branch sits on the default tip: merged.
    assert!(git
        .is_branch_merged(&repo, "worktree/feat-x", &cancel)
        .await
        .unwrap());

    // A commit on the branch makes it unmerged.
    std::fs::write(wt_path.join("feature.txt"), "new").unwrap();
    run_git(&wt_path, &["add", "."]);
    run_git(&wt_path, &["commit", "-m", "feature work"]);
    assert!(!git
        .is_branch_merged(&repo, "worktree/feat-x", &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_resolve_path_primary_and_worktree() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    init_demo_repo(&repo, "");
    let git = driver();
    let cancel = CancellationToken::new();

    let (name, worktree) = git.resolve_path(&repo, &cancel).await.unwrap();
    assert_eq!(name, "demo");
    assert_eq!(worktree, "main");

    let wt_path = tmp.path().join("worktrees/feat-x");
    git.create_worktree(&repo, "worktree/feat-x", &wt_path, None, &cancel)
        .await
        .unwrap();
    let (name, worktree) = git.resolve_path(&wt_path, &cancel).await.unwrap();
    assert_eq!(name, "demo");
    assert_eq!(worktree, "feat-x");
}

#[tokio::test]
async fn test_find_project_config_follows_worktree_pointer() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("demo");
    // Plain repo without a committed vibeman.toml.
    std::fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init"]);
    run_git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(repo.join("README.md"), "# demo\n").unwrap();
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-m", "initial commit"]);
    // Config exists only at the main repo root, untracked.
    std::fs::write(repo.join("vibeman.toml"), "[repository]\nname = \"demo\"\n").unwrap();

    let git = driver();
    let cancel = CancellationToken::new();
    let wt_path = tmp.path().join("worktrees/feat-x");
    git.create_worktree(&repo, "feat-x", &wt_path, None, &cancel)
        .await
        .unwrap();

    // The worktree checkout has no vibeman.toml of its own; discovery
    // chases the .git pointer back to the canonical repo config.
    let found = git.find_project_config(&wt_path).unwrap();
    assert_eq!(found.canonicalize().unwrap(), repo.join("vibeman.toml").canonicalize().unwrap());
}

#[tokio::test]
async fn test_find_project_config_missing_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = driver().find_project_config(tmp.path()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_clone_from_local_path() {
    let tmp = TempDir::new().unwrap();
    let origin = tmp.path().join("origin");
    init_demo_repo(&origin, "");
    let dest = tmp.path().join("clone");

    let git = driver();
    let cancel = CancellationToken::new();
    git.clone_repo(origin.to_str().unwrap(), &dest, &cancel)
        .await
        .unwrap();
    assert!(git.is_repository(&dest));
    assert!(dest.join("README.md").exists());
}

#[tokio::test]
async fn test_clone_failure_is_git_failed() {
    let tmp = TempDir::new().unwrap();
    let git = driver();
    let cancel = CancellationToken::new();
    let err = git
        .clone_repo(
            tmp.path().join("does-not-exist").to_str().unwrap(),
            &tmp.path().join("clone"),
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::GitFailed);
}
