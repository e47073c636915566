use crate::app::App;
use crate::error::VibemanError;
use tokio_util::sync::CancellationToken;

pub async fn start(app: &App, name: String, cancel: &CancellationToken) -> Result<(), VibemanError> {
    app.services.start(&name, cancel).await?;
    println!("Service '{name}' is running");
    Ok(())
}

pub async fn stop(
    app: &App,
    name: String,
    force: bool,
    cancel: &CancellationToken,
) -> Result<(), VibemanError> {
    app.services.stop(&name, force, cancel).await?;
    println!("Service '{name}' stopped");
    Ok(())
}

pub async fn restart(app: &App, name: String, cancel: &CancellationToken) -> Result<(), VibemanError> {
    app.services.restart(&name, cancel).await?;
    println!("Service '{name}' restarted");
    Ok(())
}

pub async fn list(app: &App) -> Result<(), VibemanError> {
    let instances = app.services.list().await?;
    if instances.is_empty() {
        println!("No shared services configured. Declare them in services.toml.");
        return Ok(());
    }
    for instance in instances {
        let health = if instance.last_health_error.is_empty() {
            String::new()
        } else {
            format!("  unhealthy: {}", instance.last_health_error)
        };
        println!(
            "{:<20} {:<10} {} ref(s){health}",
            instance.name,
            instance.status,
            instance.refcount()
        );
        for holder in &instance.refs {
            println!("    used by {holder}");
        }
    }
    Ok(())
}
