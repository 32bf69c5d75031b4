use super::script::{expand_placeholders, ScriptRunner};
use crate::config::SysConfig;
use crate::error::{Result, SupervisorError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const HTTP_USER_AGENT: &str = concat!("nascore-supervisor/", env!("CARGO_PKG_VERSION"));
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Log file the certificate renewal script appends to, inside `LEGO_PATH`.
pub const LEGO_LOG_FILE: &str = "lego_execLegoRenewOrGet.log";

/// Routes GitHub downloads through `mirror` when one is configured.
///
/// A mirror only counts if it is longer than a bare `https://`; it always ends
/// up with a trailing slash and is simply prefixed to the original URL.
pub fn mirrored_url(url: &str, mirror: &str) -> String {
    if mirror.len() <= "https://".len() {
        return url.to_string();
    }
    if !(url.contains("github.com/") || url.contains("raw.githubusercontent.com/")) {
        return url.to_string();
    }
    if mirror.ends_with('/') {
        format!("{}{}", mirror, url)
    } else {
        format!("{}/{}", mirror, url)
    }
}

/// Fetches `url` into `dest`, creating parent directories. Returns the number
/// of bytes written.
pub async fn download_to(url: &str, dest: &Path) -> Result<u64> {
    let client = reqwest::Client::builder()
        .user_agent(HTTP_USER_AGENT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;

    let response = client.get(url).send().await?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(SupervisorError::Download {
            url: url.to_string(),
            reason: format!("server returned status: {}", response.status()),
        });
    }

    let bytes = response.bytes().await?;
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(dest, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// Downloads the upstream DNS rule list configured for AdGuard.
pub async fn refresh_rules(config: &SysConfig) -> Result<()> {
    let ext = &config.third_party_ext;
    let url = mirrored_url(
        &ext.ad_guard.upstream_dns_file_update_url,
        &ext.github_download_mirror,
    );
    let dest = PathBuf::from(&ext.ad_guard.upstream_dns_file);

    info!("Refreshing AdGuard rules from {}", url);
    let written = download_to(&url, &dest).await?;
    info!(bytes = written, "AdGuard rules saved to {}", dest.display());
    Ok(())
}

/// Runs the ACME renewal script. Any failing line fails the whole renewal.
pub async fn renew_certificates(config: &SysConfig) -> Result<()> {
    let lego = &config.third_party_ext.acme_lego;
    let script = expand_placeholders(
        &lego.command,
        &[
            ("BinPath", lego.bin_path.as_str()),
            ("LEGO_PATH", lego.lego_path.as_str()),
        ],
    );
    let log_file = Path::new(&lego.lego_path).join(LEGO_LOG_FILE);

    info!("Running certificate renewal, log at {}", log_file.display());
    let report = ScriptRunner::new().with_log_file(log_file).run(&script).await;
    debug!(
        executed = report.executed,
        backgrounded = report.backgrounded,
        "Certificate renewal finished"
    );

    if report.is_success() {
        Ok(())
    } else {
        Err(SupervisorError::Command {
            command: "certificate renewal".to_string(),
            reason: report.failures.join("; "),
        })
    }
}

/// Unmounts then remounts configured remotes. Failures are logged only; a
/// stale mount is expected to make the unmount step fail.
pub async fn mount_remotes(config: &SysConfig) -> Result<()> {
    let rclone = &config.third_party_ext.rclone;
    let runner = ScriptRunner::new();

    let unmount = runner.run(&rclone.auto_un_mount_command).await;
    if !unmount.is_success() {
        debug!("Unmount step reported: {}", unmount.failures.join("; "));
    }

    let mount_script =
        expand_placeholders(&rclone.auto_mount_command, &[("BinPath", rclone.bin_path.as_str())]);
    let mount = runner.run(&mount_script).await;
    if !mount.is_success() {
        warn!("Mount step reported: {}", mount.failures.join("; "));
    }
    Ok(())
}
