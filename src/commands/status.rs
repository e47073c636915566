use crate::app::App;
use crate::error::VibemanError;
use tokio_util::sync::CancellationToken;

/// One-shot overview: repositories, their worktrees with live container
/// counts, and the shared-service registry.
pub async fn execute(app: &App, cancel: &CancellationToken) -> Result<(), VibemanError> {
    let repos = app.catalog.list_repositories().await;
    if repos.is_empty() {
        println!("No repositories registered. Add one with `vibeman repo add <path-or-url>`.");
    }
    for repo in &repos {
        println!("{} ({})", repo.name, repo.path.display());
        let worktrees = app.catalog.list_worktrees(Some(repo.id), None).await;
        if worktrees.is_empty() {
            println!("  no worktrees");
        }
        for worktree in worktrees {
            let running = match app.orchestrator.project_containers(&worktree, cancel).await {
                Ok(containers) => containers
                    .iter()
                    .filter(|c| c.state == crate::infra::runtime::ContainerState::Running)
                    .count(),
                Err(_) => 0,
            };
            println!(
                "  {:<20} {:<10} {} running container(s)",
                worktree.name, worktree.status, running
            );
        }
    }

    let services = app.services.list().await?;
    if !services.is_empty() {
        println!("\nShared services:");
        for service in services {
            println!(
                "  {:<20} {:<10} {} ref(s)",
                service.name,
                service.status,
                service.refcount()
            );
        }
    }
    Ok(())
}
