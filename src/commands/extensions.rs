use super::load_snapshot;
use nascore_supervisor::clienv;
use nascore_supervisor::supervisor::{platform, ExtensionLocator, LaunchContext, LivenessProbe};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Serialize)]
struct ExtensionRow {
    name: String,
    path: PathBuf,
    args: Vec<String>,
    socket_path: PathBuf,
    reachable: bool,
}

pub(crate) async fn cmd_extensions(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_snapshot(config_path)?;
    let search_paths = clienv::extension_search_paths();
    let locator = ExtensionLocator::new(platform::current());
    let ctx = LaunchContext::from_config(&config);
    let probe = LivenessProbe::default();

    let mut rows = Vec::new();
    for candidate in locator.locate(&search_paths, &ctx) {
        let socket_path = candidate.rule.socket_path(&ctx.socket_dir);
        let reachable = probe.probe(candidate.rule.name, &socket_path).await;
        rows.push(ExtensionRow {
            name: candidate.rule.name.to_string(),
            path: candidate.path,
            args: candidate.args,
            socket_path,
            reachable,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Search paths:");
    for dir in &search_paths {
        let marker = if dir.is_dir() { "" } else { " (missing)" };
        println!("  {}{}", dir.display(), marker);
    }
    println!();

    if rows.is_empty() {
        println!("No extensions found");
        return Ok(());
    }

    println!("{:<16} {:<12} {}", "Extension", "Socket", "Executable");
    for row in &rows {
        println!(
            "{:<16} {:<12} {}",
            row.name,
            if row.reachable { "reachable" } else { "unreachable" },
            row.path.display()
        );
        println!("  args: {}", row.args.join(" "));
    }
    println!();

    Ok(())
}

pub(crate) async fn cmd_probe(socket: &Path, timeout_ms: u64) -> anyhow::Result<()> {
    let probe = LivenessProbe::new(Duration::from_millis(timeout_ms));
    let name = socket
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("socket");

    if !probe.probe(name, socket).await {
        anyhow::bail!("No healthy listener on {}", socket.display());
    }
    println!("{} is reachable", socket.display());
    Ok(())
}
