//! Follow-start: opportunistically make sure auxiliary programs are running.
//!
//! Each follow-start owns a guard that works as a latch. The first tick that
//! finds it idle claims it and keeps it claimed after the attempt, so a
//! standalone supervisor starts every program once per process lifetime. A
//! stateless tick resets all guards first and therefore retries every time.
//! If the attempt panics the latch is released.

use super::guard::{GuardSet, SingletonGuard};
use super::locator::{ExtensionLocator, LaunchContext};
use super::mode::Dispatch;
use super::services::{ServiceManager, ServiceSpec, SERVICES};
use super::tasks;
use crate::clienv;
use crate::config::SysConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait FollowStart: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self, config: &SysConfig) -> bool;

    async fn start(&self, config: Arc<SysConfig>) -> Result<()>;
}

/// Kill-then-start for a pidfile-managed service.
pub struct ManagedFollowStart {
    spec: &'static ServiceSpec,
    manager: Arc<ServiceManager>,
}

impl ManagedFollowStart {
    pub fn new(spec: &'static ServiceSpec, manager: Arc<ServiceManager>) -> Self {
        Self { spec, manager }
    }
}

#[async_trait]
impl FollowStart for ManagedFollowStart {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn enabled(&self, config: &SysConfig) -> bool {
        self.spec.enabled(config)
    }

    async fn start(&self, config: Arc<SysConfig>) -> Result<()> {
        self.manager.restart(self.spec.name, &config).await?;
        Ok(())
    }
}

/// Re-runs the remote unmount and mount scripts.
pub struct MountFollowStart;

#[async_trait]
impl FollowStart for MountFollowStart {
    fn name(&self) -> &str {
        "rclone"
    }

    fn enabled(&self, config: &SysConfig) -> bool {
        config.third_party_ext.rclone.auto_mount_enable
    }

    async fn start(&self, config: Arc<SysConfig>) -> Result<()> {
        tasks::mount_remotes(&config).await
    }
}

/// Locates extension executables and launches each once. Always enabled.
pub struct ExtensionFollowStart {
    locator: Arc<ExtensionLocator>,
    search_paths: Option<Vec<PathBuf>>,
}

impl ExtensionFollowStart {
    pub fn new(locator: Arc<ExtensionLocator>) -> Self {
        Self {
            locator,
            search_paths: None,
        }
    }

    /// Scans `paths` instead of the environment-derived search paths.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = Some(paths);
        self
    }
}

#[async_trait]
impl FollowStart for ExtensionFollowStart {
    fn name(&self) -> &str {
        "extensions"
    }

    fn enabled(&self, _config: &SysConfig) -> bool {
        true
    }

    async fn start(&self, config: Arc<SysConfig>) -> Result<()> {
        let paths = self
            .search_paths
            .clone()
            .unwrap_or_else(clienv::extension_search_paths);
        let ctx = LaunchContext::from_config(&config);
        let launched = self.locator.launch_all(&paths, &ctx).await;
        info!(launched = launched, "Extension launch pass finished");
        Ok(())
    }
}

struct Entry {
    guard: Arc<SingletonGuard>,
    action: Arc<dyn FollowStart>,
}

/// Ordered follow-start table.
#[derive(Default)]
pub struct FollowStarter {
    entries: Vec<Entry>,
}

impl FollowStarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount, then the managed services in table order, then extensions.
    pub fn standard(
        guards: &GuardSet,
        manager: Arc<ServiceManager>,
        locator: Arc<ExtensionLocator>,
    ) -> Self {
        let mut starter = Self::standard_services(guards, manager);
        starter.register(guards, Arc::new(ExtensionFollowStart::new(locator)));
        starter
    }

    /// The standard table without the extension launcher.
    pub fn standard_services(guards: &GuardSet, manager: Arc<ServiceManager>) -> Self {
        let mut starter = Self::new();
        starter.register(guards, Arc::new(MountFollowStart));
        for spec in SERVICES {
            starter.register(
                guards,
                Arc::new(ManagedFollowStart::new(spec, Arc::clone(&manager))),
            );
        }
        starter
    }

    /// Appends a follow-start; its guard is registered as `follow:<name>`.
    pub fn register(&mut self, guards: &GuardSet, action: Arc<dyn FollowStart>) {
        let guard = guards.register(&format!("follow:{}", action.name()));
        self.entries.push(Entry { guard, action });
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.action.name().to_string())
            .collect()
    }

    /// Attempts every enabled follow-start whose latch is free. Returns how
    /// many were attempted.
    pub async fn run_pass(&self, config: Arc<SysConfig>, dispatch: Dispatch) -> usize {
        let mut attempted = 0;

        for entry in &self.entries {
            if !entry.action.enabled(&config) {
                continue;
            }
            let Some(permit) = entry.guard.enter_owned() else {
                continue;
            };

            info!(follow_start = entry.action.name(), "Starting follow-start");
            attempted += 1;

            let action = Arc::clone(&entry.action);
            let config = Arc::clone(&config);
            dispatch
                .run(async move {
                    if let Err(e) = action.start(config).await {
                        warn!(follow_start = action.name(), "Follow-start failed: {}", e);
                    }
                    permit.latch();
                })
                .await;
        }

        attempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::platform::PosixPolicy;
    use crate::supervisor::process::ProcessHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        enabled: bool,
        panic: bool,
        runs: AtomicUsize,
    }

    impl Counting {
        fn new(name: &'static str, enabled: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled,
                panic: false,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FollowStart for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn enabled(&self, _config: &SysConfig) -> bool {
            self.enabled
        }

        async fn start(&self, _config: Arc<SysConfig>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("follow-start blew up");
            }
            Ok(())
        }
    }

    fn config() -> Arc<SysConfig> {
        Arc::new(SysConfig::default())
    }

    #[test]
    fn standard_order() {
        let guards = GuardSet::new();
        let manager = Arc::new(ServiceManager::new(ProcessHandle::new(Arc::new(PosixPolicy))));
        let locator = Arc::new(ExtensionLocator::new(Arc::new(PosixPolicy)));
        let starter = FollowStarter::standard(&guards, manager, locator);

        assert_eq!(
            starter.names(),
            vec!["rclone", "ddns-go", "caddy2", "openlist", "extensions"]
        );
        assert!(guards.get("follow:caddy2").is_some());
    }

    #[tokio::test]
    async fn latch_holds_until_reset() {
        let guards = GuardSet::new();
        let action = Counting::new("caddy2", true);
        let mut starter = FollowStarter::new();
        starter.register(&guards, Arc::clone(&action) as Arc<dyn FollowStart>);

        assert_eq!(starter.run_pass(config(), Dispatch::Inline).await, 1);
        assert_eq!(starter.run_pass(config(), Dispatch::Inline).await, 0);
        assert_eq!(action.runs.load(Ordering::SeqCst), 1);

        guards.reset_all();
        assert_eq!(starter.run_pass(config(), Dispatch::Inline).await, 1);
        assert_eq!(action.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_entries_are_skipped() {
        let guards = GuardSet::new();
        let action = Counting::new("openlist", false);
        let mut starter = FollowStarter::new();
        starter.register(&guards, Arc::clone(&action) as Arc<dyn FollowStart>);

        assert_eq!(starter.run_pass(config(), Dispatch::Inline).await, 0);
        assert!(!guards.get("follow:openlist").unwrap().is_running());
    }

    #[tokio::test]
    async fn panic_releases_latch() {
        let guards = GuardSet::new();
        let action = Arc::new(Counting {
            name: "ddns-go",
            enabled: true,
            panic: true,
            runs: AtomicUsize::new(0),
        });
        let mut starter = FollowStarter::new();
        starter.register(&guards, action);

        starter.run_pass(config(), Dispatch::Background).await;
        let guard = guards.get("follow:ddns-go").unwrap();
        for _ in 0..100 {
            if !guard.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!guard.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn managed_follow_start_writes_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SysConfig::default();
        config.server.temp_file_path = dir.path().display().to_string();
        config.third_party_ext.caddy2.bin_path = "sleep".into();
        config.third_party_ext.caddy2.auto_start_enable = true;
        let config = Arc::new(config);

        let manager = Arc::new(ServiceManager::new(ProcessHandle::new(Arc::new(PosixPolicy))));
        let spec = crate::supervisor::services::find_service("caddy2").unwrap();
        let follow = ManagedFollowStart::new(spec, Arc::clone(&manager));

        // `sleep run --config <path>` exits with an error right away, which
        // is enough to prove the launch happened
        follow.start(Arc::clone(&config)).await.unwrap();
        manager.stop("caddy2", &config).await.unwrap();
        assert!(!spec.pid_file_path(&config).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn extension_follow_start_scans_given_paths() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let script = dir.path().join("nascore_tv");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" > {}\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = SysConfig::default();
        config.server.unix_socket_file_path = "/run/nascore/".into();
        config.third_party_ext.github_download_mirror = "https://m.example/".into();

        let locator = Arc::new(ExtensionLocator::new(Arc::new(PosixPolicy)));
        let follow =
            ExtensionFollowStart::new(locator).with_search_paths(vec![dir.path().to_path_buf()]);
        follow.start(Arc::new(config)).await.unwrap();

        let args = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(
            args.trim(),
            "-s /run/nascore/nascore_tv.socket -githubDownloadMirror https://m.example/"
        );
    }
}
