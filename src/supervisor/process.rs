use super::platform::PlatformPolicy;
use crate::error::{Result, SupervisorError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A child launched by [`ProcessHandle::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub binary_path: PathBuf,
    pub argv: Vec<String>,
    pub pid_file: PathBuf,
    pub pid: Option<u32>,
}

/// Pidfile-backed lifecycle for external binaries.
///
/// A pidfile is only ever used to aim a kill signal; it is never taken as
/// proof that the process is still alive.
#[derive(Clone)]
pub struct ProcessHandle {
    platform: Arc<dyn PlatformPolicy>,
}

impl ProcessHandle {
    pub fn new(platform: Arc<dyn PlatformPolicy>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<dyn PlatformPolicy> {
        &self.platform
    }

    /// Launches `binary` detached, records its PID in `pid_file`, and removes
    /// the pidfile once the process exits.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(
        &self,
        binary: &Path,
        args: &[String],
        pid_file: &Path,
    ) -> Result<ManagedProcess> {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", binary.display(), e);
                remove_pid_file(pid_file).await;
                return Err(SupervisorError::Launch {
                    binary: binary.to_path_buf(),
                    source: e,
                });
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            if let Err(e) = write_pid_file(pid_file, pid).await {
                warn!("Failed to write pidfile {}: {}", pid_file.display(), e);
            }
        }

        let waiter_pid_file = pid_file.to_path_buf();
        let waiter_binary = binary.display().to_string();
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!("{} exited: {:?}", waiter_binary, status);
            if let Some(pid) = pid {
                // a restart may already have replaced the pidfile
                if read_pid(&waiter_pid_file).await == Some(pid) {
                    remove_pid_file(&waiter_pid_file).await;
                }
            }
        });

        info!(
            pid = ?pid,
            pid_file = %pid_file.display(),
            "Started {}",
            binary.display()
        );

        Ok(ManagedProcess {
            binary_path: binary.to_path_buf(),
            argv: args.to_vec(),
            pid_file: pid_file.to_path_buf(),
            pid,
        })
    }

    /// Best-effort stop: signals the PID recorded in `pid_file` (if any), then
    /// removes the pidfile. A missing pidfile means already stopped.
    pub async fn kill(&self, pid_file: &Path) {
        match read_pid(pid_file).await {
            Some(pid) => {
                debug!("Terminating PID {} from {}", pid, pid_file.display());
                if let Err(e) = self.platform.terminate(pid) {
                    warn!("Failed to terminate PID {}: {}", pid, e);
                }
            }
            None => {
                debug!("No usable pidfile at {}", pid_file.display());
            }
        }
        remove_pid_file(pid_file).await;
    }

    /// Non-graceful restart: kill whatever the pidfile names, then start anew.
    pub async fn restart(
        &self,
        binary: &Path,
        args: &[String],
        pid_file: &Path,
    ) -> Result<ManagedProcess> {
        self.kill(pid_file).await;
        self.start(binary, args, pid_file).await
    }

    /// PID recorded in `pid_file` together with whether it is still alive.
    pub async fn status(&self, pid_file: &Path) -> Option<(u32, bool)> {
        let pid = read_pid(pid_file).await?;
        Some((pid, self.platform.is_alive(pid)))
    }
}

/// Reads a decimal PID; missing, empty or malformed files yield `None`.
pub async fn read_pid(pid_file: &Path) -> Option<u32> {
    let content = tokio::fs::read_to_string(pid_file).await.ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

async fn write_pid_file(pid_file: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = pid_file.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(pid_file, pid.to_string()).await
}

async fn remove_pid_file(pid_file: &Path) {
    match tokio::fs::remove_file(pid_file).await {
        Ok(()) => debug!("Removed pidfile {}", pid_file.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove pidfile {}: {}", pid_file.display(), e),
    }
}
