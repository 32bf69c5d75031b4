use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Everything OS-specific the supervisor needs, selected once at startup.
pub trait PlatformPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a directory entry may be launched as an extension.
    fn is_executable(&self, path: &Path, metadata: &Metadata) -> bool;

    /// Resolves a configured binary path to what the OS will actually run.
    fn binary_path(&self, configured: &str) -> PathBuf;

    /// Sends a termination request to `pid`.
    fn terminate(&self, pid: u32) -> std::io::Result<()>;

    /// Whether `pid` currently refers to a live process.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Policy for the OS this binary was built for.
pub fn current() -> Arc<dyn PlatformPolicy> {
    if cfg!(windows) {
        Arc::new(WindowsPolicy)
    } else {
        Arc::new(PosixPolicy)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixPolicy;

impl PlatformPolicy for PosixPolicy {
    fn name(&self) -> &'static str {
        "posix"
    }

    #[cfg(unix)]
    fn is_executable(&self, _path: &Path, metadata: &Metadata) -> bool {
        use std::os::unix::fs::PermissionsExt;
        metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    fn is_executable(&self, _path: &Path, _metadata: &Metadata) -> bool {
        false
    }

    fn binary_path(&self, configured: &str) -> PathBuf {
        PathBuf::from(configured)
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        let pid = libc::pid_t::try_from(pid).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range")
        })?;
        // SAFETY: kill(2) takes plain integers and has no memory effects.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        run_status("kill", &[pid.to_string()])
    }

    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 only checks for existence and permission.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

const WINDOWS_EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "com"];

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPolicy;

impl PlatformPolicy for WindowsPolicy {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn is_executable(&self, path: &Path, metadata: &Metadata) -> bool {
        metadata.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .is_some_and(|e| WINDOWS_EXECUTABLE_EXTENSIONS.contains(&e.as_str()))
    }

    fn binary_path(&self, configured: &str) -> PathBuf {
        if configured.is_empty() || configured.to_ascii_lowercase().ends_with(".exe") {
            PathBuf::from(configured)
        } else {
            PathBuf::from(format!("{configured}.exe"))
        }
    }

    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        run_status(
            "taskkill",
            &["/F".to_string(), "/PID".to_string(), pid.to_string()],
        )
    }

    fn is_alive(&self, pid: u32) -> bool {
        let filter = format!("PID eq {pid}");
        match std::process::Command::new("tasklist")
            .args(["/FI", &filter, "/NH"])
            .output()
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .any(|field| field == pid.to_string()),
            Err(e) => {
                debug!("tasklist failed for PID {}: {}", pid, e);
                false
            }
        }
    }
}

fn run_status(program: &str, args: &[String]) -> std::io::Result<()> {
    let status = std::process::Command::new(program).args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "{} {} exited with {}",
            program,
            args.join(" "),
            status
        )))
    }
}
