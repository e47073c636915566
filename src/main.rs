use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vibeman::app::App;
use vibeman::cli::{Cli, Commands, RepoSubcommand, ServiceSubcommand, WorktreeSubcommand};
use vibeman::commands;
use vibeman::config::GlobalConfig;
use vibeman::error::VibemanError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let _guard = init_tracing(&config);

    // Ctrl-C cancels the in-flight operation; compensating actions still
    // run under their own deadline.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(cli, config, &cancel).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(hint) = &e.hint {
                eprintln!("hint: {hint}");
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn load_config(cli: &Cli) -> Result<GlobalConfig, VibemanError> {
    match &cli.config {
        Some(path) => GlobalConfig::load_from(path),
        None => GlobalConfig::load(),
    }
}

async fn run(cli: Cli, config: GlobalConfig, cancel: &CancellationToken) -> Result<(), VibemanError> {
    let app = App::init(config).await?;

    match cli.command {
        Commands::Repo { action } => match action {
            RepoSubcommand::Add {
                source,
                name,
                description,
            } => commands::repo::add(&app, source, name, description, cancel).await?,
            RepoSubcommand::Remove { target, force } => {
                commands::repo::remove(&app, target, force).await?
            }
            RepoSubcommand::List => commands::repo::list(&app).await?,
        },

        Commands::Worktree { action } => match action {
            WorktreeSubcommand::Create {
                repo,
                name,
                branch,
                base,
                compose_file,
                services,
                no_start,
                skip_setup,
                post_script,
            } => {
                commands::worktree::create(
                    &app,
                    repo,
                    name,
                    branch,
                    base,
                    compose_file,
                    services,
                    no_start,
                    skip_setup,
                    post_script,
                    cancel,
                )
                .await?
            }
            WorktreeSubcommand::Start { repo, name } => {
                commands::worktree::start(&app, repo, name, cancel).await?
            }
            WorktreeSubcommand::Stop { repo, name } => {
                commands::worktree::stop(&app, repo, name, cancel).await?
            }
            WorktreeSubcommand::Remove { repo, name, force } => {
                commands::worktree::remove(&app, repo, name, force, cancel).await?
            }
            WorktreeSubcommand::List { repo } => {
                commands::worktree::list(&app, repo, cancel).await?
            }
        },

        Commands::Service { action } => match action {
            ServiceSubcommand::Start { name } => {
                commands::service::start(&app, name, cancel).await?
            }
            ServiceSubcommand::Stop { name, force } => {
                commands::service::stop(&app, name, force, cancel).await?
            }
            ServiceSubcommand::Restart { name } => {
                commands::service::restart(&app, name, cancel).await?
            }
            ServiceSubcommand::List => commands::service::list(&app).await?,
        },

        Commands::Status => commands::status::execute(&app, cancel).await?,

        Commands::Logs {
            repo,
            worktree,
            service,
            follow,
            tail,
            since,
        } => {
            commands::logs::execute(&app, repo, worktree, service, follow, tail, since, cancel)
                .await?
        }

        Commands::Doctor => commands::doctor::execute(&app, cancel).await?,

        Commands::Reconcile => {
            let changed = app.orchestrator.reconcile(cancel).await?;
            if changed.is_empty() {
                println!("Catalog in agreement with the runtime.");
            } else {
                println!("Repaired {} drifted record(s).", changed.len());
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

/// Initialize tracing with a file appender under the state directory.
/// Returns a guard that must be held for the lifetime of the program.
fn init_tracing(config: &GlobalConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};

    let log_dir = config.storage.state_path.clone();
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let file_appender = tracing_appender::rolling::never(&log_dir, "vibeman.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .init();

    Some(guard)
}
