mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use nascore_supervisor::clienv;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.unwrap_or_else(clienv::config_path);

    match cli.command {
        Commands::Run {
            stateless,
            tick_secs,
        } => commands::run::cmd_run(&config_path, stateless, tick_secs).await?,
        Commands::Tick => commands::run::cmd_tick(&config_path).await?,
        Commands::Status { json } => commands::service::cmd_status(&config_path, json).await?,
        Commands::Start { service } => commands::service::cmd_start(&config_path, &service).await?,
        Commands::Stop { service } => commands::service::cmd_stop(&config_path, &service).await?,
        Commands::Restart { service } => {
            commands::service::cmd_restart(&config_path, &service).await?
        }
        Commands::Extensions { json } => {
            commands::extensions::cmd_extensions(&config_path, json).await?
        }
        Commands::Probe { socket, timeout_ms } => {
            commands::extensions::cmd_probe(&socket, timeout_ms).await?
        }
        Commands::InitConfig { force } => commands::config::cmd_init_config(&config_path, force)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
