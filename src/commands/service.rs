use super::{load_config, load_snapshot};
use nascore_supervisor::supervisor::{
    platform, ExtensionHealth, ProcessHandle, ServiceInfo, ServiceManager,
};
use nascore_supervisor::Supervisor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Serialize)]
struct StatusReport {
    mode: String,
    services: Vec<ServiceInfo>,
    extensions: BTreeMap<String, ExtensionHealth>,
}

fn manager() -> ServiceManager {
    ServiceManager::new(ProcessHandle::new(platform::current()))
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

pub(crate) async fn cmd_status(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let supervisor = Supervisor::new(load_config(config_path, None)?);
    let config = supervisor.config().snapshot();

    supervisor.check_extensions().await;
    let report = StatusReport {
        mode: config.server.run_mode().to_string(),
        services: supervisor.services().list(&config).await,
        extensions: supervisor.extension_status().into_iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Supervisor Status");
    println!("  Mode:   {}", report.mode);
    println!("  Config: {}", config_path.display());
    println!();

    println!(
        "{:<12} {:<8} {:<8} {:<8} {}",
        "Service", "Enabled", "Proxy", "State", "PID"
    );
    for svc in &report.services {
        let state = if svc.alive { "running" } else { "stopped" };
        let pid = svc
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<8} {:<8} {:<8} {}",
            svc.name,
            yes_no(svc.enabled),
            yes_no(svc.proxy_enabled),
            state,
            pid
        );
    }
    println!();

    if report.extensions.is_empty() {
        println!("No extension launch rules configured");
        return Ok(());
    }

    println!("{:<16} {:<12} {}", "Extension", "Socket", "Path");
    for (name, health) in &report.extensions {
        println!(
            "{:<16} {:<12} {}",
            name,
            if health.reachable { "reachable" } else { "unreachable" },
            health.socket_path.display()
        );
    }
    println!();

    Ok(())
}

pub(crate) async fn cmd_start(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let config = load_snapshot(config_path)?;

    println!("Starting service {}...", name);
    let started = manager().start(name, &config).await?;
    match started.pid {
        Some(pid) => println!("Service {} started (PID {})", name, pid),
        None => println!("Service {} started", name),
    }
    Ok(())
}

pub(crate) async fn cmd_stop(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let config = load_snapshot(config_path)?;

    println!("Stopping service {}...", name);
    manager().stop(name, &config).await?;
    println!("Service {} stopped", name);
    Ok(())
}

pub(crate) async fn cmd_restart(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let config = load_snapshot(config_path)?;

    println!("Restarting service {}...", name);
    let started = manager().restart(name, &config).await?;
    match started.pid {
        Some(pid) => println!("Service {} restarted (PID {})", name, pid),
        None => println!("Service {} restarted", name),
    }
    Ok(())
}
