use crate::app::App;
use crate::error::VibemanError;
use crate::infra::runtime::LogOptions;
use tokio_util::sync::CancellationToken;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    app: &App,
    repo: String,
    worktree: String,
    service: Option<String>,
    follow: bool,
    tail: Option<u32>,
    since: Option<String>,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    let repo = app.registrar.resolve(&repo).await?;
    let worktree = app.catalog.get_worktree_by_name(repo.id, &worktree).await?;
    let mut stream = app
        .orchestrator
        .worktree_logs(worktree.id, service.as_deref(), LogOptions { follow, tail, since })
        .await?;

    let mut stdout = tokio::io::stdout();
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::io::copy(&mut stream, &mut stdout) => {
            result?;
        }
    }
    Ok(())
}
