use super::platform::PlatformPolicy;
use crate::config::SysConfig;
use crate::error::{Result, SupervisorError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Declares which executables are extensions and how to launch them.
///
/// A file matches when its lowercase name contains any of `keywords`. Rules
/// are evaluated in table order and the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchRule {
    /// Logical extension name, also the key in the liveness map
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    /// Socket file the extension listens on, relative to the socket dir
    pub socket_file: &'static str,
    /// Argument template; `{socket}` and `{mirror}` are substituted
    pub args: &'static [&'static str],
}

pub const DEFAULT_LAUNCH_RULES: &[LaunchRule] = &[LaunchRule {
    name: "nascore_tv",
    keywords: &["tv", "vod"],
    socket_file: "nascore_tv.socket",
    args: &["-s", "{socket}", "-githubDownloadMirror", "{mirror}"],
}];

impl LaunchRule {
    pub fn matches(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k))
    }

    pub fn socket_path(&self, socket_dir: &Path) -> PathBuf {
        socket_dir.join(self.socket_file)
    }

    pub fn render_args(&self, ctx: &LaunchContext) -> Vec<String> {
        let socket = self.socket_path(&ctx.socket_dir).display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{socket}", &socket)
                    .replace("{mirror}", &ctx.github_mirror)
            })
            .collect()
    }
}

/// Per-pass inputs read from the live config: template values and the
/// ignore list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    pub socket_dir: PathBuf,
    pub github_mirror: String,
    /// Lowercase file extensions without the leading dot
    pub ignore_extensions: Vec<String>,
}

impl LaunchContext {
    pub fn from_config(config: &SysConfig) -> Self {
        Self {
            socket_dir: config.server.socket_dir(),
            github_mirror: config.third_party_ext.github_download_mirror.clone(),
            ignore_extensions: config
                .extensions
                .ignore_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| self.ignore_extensions.contains(&e))
    }
}

/// An executable that matched a launch rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub rule: &'static LaunchRule,
    pub args: Vec<String>,
}

impl Candidate {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Scans search directories for extension executables.
pub struct ExtensionLocator {
    platform: Arc<dyn PlatformPolicy>,
    rules: &'static [LaunchRule],
}

impl ExtensionLocator {
    pub fn new(platform: Arc<dyn PlatformPolicy>) -> Self {
        Self {
            platform,
            rules: DEFAULT_LAUNCH_RULES,
        }
    }

    pub fn with_rules(mut self, rules: &'static [LaunchRule]) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &'static [LaunchRule] {
        self.rules
    }

    fn match_rule(&self, file_name: &str) -> Option<&'static LaunchRule> {
        self.rules.iter().find(|rule| rule.matches(file_name))
    }

    /// Lists launchable extensions across `search_paths`, in directory order
    /// and then by file name. Unreadable directories are skipped.
    pub fn locate(&self, search_paths: &[PathBuf], ctx: &LaunchContext) -> Vec<Candidate> {
        let mut found = Vec::new();

        for dir in search_paths {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping extension dir {}: {}", dir.display(), e);
                    continue;
                }
            };

            let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
            paths.sort();

            for path in paths {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if ctx.is_ignored(&path) {
                    continue;
                }
                let Some(rule) = self.match_rule(file_name) else {
                    continue;
                };
                let metadata = match std::fs::metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("Cannot stat {}: {}", path.display(), e);
                        continue;
                    }
                };
                if !self.platform.is_executable(&path, &metadata) {
                    debug!("Not executable on {}: {}", self.platform.name(), path.display());
                    continue;
                }

                found.push(Candidate {
                    args: rule.render_args(ctx),
                    path,
                    rule,
                });
            }
        }

        found
    }

    /// Runs a candidate once and waits for it to hand off to its own daemon.
    /// The locator does not track the resulting process.
    pub async fn launch(&self, candidate: &Candidate) -> Result<()> {
        info!("Launching extension {} {:?}", candidate.path.display(), candidate.args);

        let output = Command::new(&candidate.path)
            .args(&candidate.args)
            .output()
            .await
            .map_err(|e| SupervisorError::Launch {
                binary: candidate.path.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            debug!(extension = %candidate.file_name(), "Extension output: {}{}", stdout, stderr);
            Ok(())
        } else {
            warn!(
                extension = %candidate.file_name(),
                "Extension exited with {}: {}{}",
                output.status,
                stdout,
                stderr
            );
            Err(SupervisorError::Command {
                command: candidate.path.display().to_string(),
                reason: format!("exited with {}", output.status),
            })
        }
    }

    /// Locates and launches every candidate. One failing launch does not stop
    /// the others; the number of successful launches is returned.
    pub async fn launch_all(&self, search_paths: &[PathBuf], ctx: &LaunchContext) -> usize {
        let candidates = self.locate(search_paths, ctx);
        let mut launched = 0;
        for candidate in &candidates {
            if self.launch(candidate).await.is_ok() {
                launched += 1;
            }
        }
        launched
    }
}
