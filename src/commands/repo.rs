use crate::app::App;
use crate::error::VibemanError;
use tokio_util::sync::CancellationToken;

pub async fn add(
    app: &App,
    source: String,
    name: Option<String>,
    description: Option<String>,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    let repo = app.registrar.add(&source, name, description, cancel).await?;
    println!("Registered '{}' at {}", repo.name, repo.path.display());
    Ok(())
}

pub async fn remove(app: &App, target: String, force: bool) -> Result<(), VibemanError> {
    let repo = app.registrar.remove(&target, force).await?;
    println!("Removed '{}' from the catalog (files kept at {})", repo.name, repo.path.display());
    Ok(())
}

pub async fn list(app: &App) -> Result<(), VibemanError> {
    let repos = app.registrar.list().await;
    if repos.is_empty() {
        println!("No repositories registered. Add one with `vibeman repo add <path-or-url>`.");
        return Ok(());
    }
    for repo in repos {
        let worktrees = app.catalog.list_worktrees(Some(repo.id), None).await;
        println!(
            "{:<20} {:<3} worktree(s)  {}",
            repo.name,
            worktrees.len(),
            repo.path.display()
        );
    }
    Ok(())
}
