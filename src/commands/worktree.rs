use crate::app::App;
use crate::domain::worktree::Worktree;
use crate::error::VibemanError;
use crate::orchestrator::CreateWorktreeRequest;
use tokio_util::sync::CancellationToken;

#[allow(clippy::too_many_arguments)]
pub async fn create(
    app: &App,
    repo: String,
    name: String,
    branch: Option<String>,
    base: Option<String>,
    compose_file: Option<String>,
    services: Vec<String>,
    no_start: bool,
    skip_setup: bool,
    post_scripts: Vec<String>,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    let repo = app.registrar.resolve(&repo).await?;
    let request = CreateWorktreeRequest {
        repository_id: repo.id,
        name,
        branch,
        base_branch: base,
        skip_setup,
        auto_start: !no_start,
        compose_file,
        compose_services: if services.is_empty() { None } else { Some(services) },
        post_scripts,
    };
    let outcome = app.orchestrator.create_worktree(request, cancel).await?;
    println!(
        "Worktree '{}' is {} at {}",
        outcome.worktree.name,
        outcome.worktree.status,
        outcome.worktree.path.display()
    );
    print_warnings(&outcome.warnings);
    Ok(())
}

pub async fn start(
    app: &App,
    repo: String,
    name: String,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    let worktree = resolve(app, &repo, &name).await?;
    let outcome = app.orchestrator.start_worktree(worktree.id, cancel).await?;
    println!("Worktree '{}' is {}", outcome.worktree.name, outcome.worktree.status);
    print_warnings(&outcome.warnings);
    Ok(())
}

pub async fn stop(
    app: &App,
    repo: String,
    name: String,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    let worktree = resolve(app, &repo, &name).await?;
    let outcome = app.orchestrator.stop_worktree(worktree.id, cancel).await?;
    println!("Worktree '{}' is {}", outcome.worktree.name, outcome.worktree.status);
    Ok(())
}

pub async fn remove(
    app: &App,
    repo: String,
    name: String,
    force: bool,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    let worktree = resolve(app, &repo, &name).await?;
    let warnings = app
        .orchestrator
        .remove_worktree(worktree.id, force, cancel)
        .await?;
    println!("Worktree '{name}' removed");
    print_warnings(&warnings);
    Ok(())
}

pub async fn list(app: &App, repo: Option<String>, cancel: &CancellationToken) -> Result<(), VibemanError> {
    let repo_filter = match repo {
        Some(target) => Some(app.registrar.resolve(&target).await?),
        None => None,
    };
    let worktrees = app
        .catalog
        .list_worktrees(repo_filter.as_ref().map(|r| r.id), None)
        .await;
    if worktrees.is_empty() {
        println!("No worktrees. Create one with `vibeman worktree create <repo> <name>`.");
        return Ok(());
    }
    for worktree in worktrees {
        let containers = app
            .orchestrator
            .project_containers(&worktree, cancel)
            .await
            .map(|c| c.len())
            .unwrap_or(0);
        println!(
            "{:<20} {:<10} {:<3} container(s)  branch {}",
            worktree.name, worktree.status, containers, worktree.branch
        );
    }
    Ok(())
}

async fn resolve(app: &App, repo: &str, name: &str) -> Result<Worktree, VibemanError> {
    let repo = app.registrar.resolve(repo).await?;
    app.catalog.get_worktree_by_name(repo.id, name).await
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  warning: {warning}");
    }
}
