use crate::app::App;
use crate::error::VibemanError;
use crate::infra::command::ShellCommandRunner;
use crate::infra::runtime::DockerComposeRuntime;
use tokio_util::sync::CancellationToken;

/// Preflight diagnostics: external binaries, daemon, config, state dir.
pub async fn execute(app: &App, cancel: &CancellationToken) -> Result<(), VibemanError> {
    println!("vibeman doctor: checking environment\n");
    let mut issues = 0;

    print!("  git: ");
    if ShellCommandRunner::is_available("git") {
        println!("ok");
    } else {
        println!("NOT FOUND - install git");
        issues += 1;
    }

    print!("  docker: ");
    if DockerComposeRuntime::binary_available() {
        let runtime = DockerComposeRuntime::new(
            std::sync::Arc::new(ShellCommandRunner::new()),
            app.config.timeouts.clone(),
        );
        if runtime.daemon_available(cancel).await {
            println!("ok");
        } else {
            println!("binary found but the daemon is not responding");
            issues += 1;
        }
    } else {
        println!("NOT FOUND - container operations will fail");
        issues += 1;
    }

    print!("  services file: ");
    let services_path = &app.config.services.config_path;
    if services_path.exists() {
        match crate::config::ServicesFile::load(services_path) {
            Ok(defs) => println!("ok ({} service(s))", defs.len()),
            Err(e) => {
                println!("PARSE ERROR - {}", e.message);
                issues += 1;
            }
        }
    } else {
        println!("absent (no shared services configured)");
    }

    print!("  state dir: ");
    let state = &app.config.storage.state_path;
    match tokio::fs::create_dir_all(state).await {
        Ok(()) => println!("ok ({})", state.display()),
        Err(e) => {
            println!("NOT WRITABLE - {e}");
            issues += 1;
        }
    }

    println!("\n  Reconciling catalog against the runtime...");
    match app.orchestrator.reconcile(cancel).await {
        Ok(changed) if changed.is_empty() => println!("  catalog in agreement with runtime"),
        Ok(changed) => println!("  repaired {} drifted record(s)", changed.len()),
        Err(e) => {
            println!("  reconcile failed: {}", e.message);
            issues += 1;
        }
    }

    if issues == 0 {
        println!("\nAll clear.");
    } else {
        println!("\n{issues} issue(s) found.");
    }
    Ok(())
}
