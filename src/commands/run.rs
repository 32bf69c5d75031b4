use super::load_config;
use nascore_supervisor::{RunMode, Supervisor};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Runs until Ctrl+C. In stateless mode each tick (every `tick_secs`) stands in
/// for an inbound request, so it restarts every enabled service.
pub(crate) async fn cmd_run(
    config_path: &Path,
    force_stateless: bool,
    tick_secs: u64,
) -> anyhow::Result<()> {
    let pinned = force_stateless.then_some(RunMode::Stateless);
    let shared = load_config(config_path, pinned)?;

    let mode = shared.snapshot().server.run_mode();
    println!("Running supervisor in {} mode (Ctrl+C to stop)", mode);
    println!("  Config: {}", config_path.display());
    println!();

    let supervisor = Supervisor::new(shared);

    match mode {
        RunMode::Standalone => {
            supervisor.tick().await;
            tokio::signal::ctrl_c().await?;
        }
        RunMode::Stateless => {
            warn!(
                "Stateless mode restarts every enabled service each tick ({}s)",
                tick_secs
            );
            let mut interval = tokio::time::interval(Duration::from_secs(tick_secs.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => supervisor.tick().await,
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        break;
                    }
                }
            }
        }
    }

    info!("Supervisor stopped");
    Ok(())
}

pub(crate) async fn cmd_tick(config_path: &Path) -> anyhow::Result<()> {
    let shared = load_config(config_path, Some(RunMode::Stateless))?;

    let supervisor = Supervisor::new(shared);
    supervisor.tick().await;

    let mut status: Vec<_> = supervisor.extension_status().into_iter().collect();
    status.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, health) in status {
        println!(
            "{:<16} {:<12} {}",
            name,
            if health.reachable { "reachable" } else { "unreachable" },
            health.socket_path.display()
        );
    }
    Ok(())
}
