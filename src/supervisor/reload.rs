use crate::config::{RunMode, SysConfig};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// The live configuration, shared by every caller.
///
/// Readers take a snapshot and keep seeing that value; a reload swaps in a
/// whole new `SysConfig`, so nobody observes a half-updated one. Re-read
/// through [`snapshot`](Self::snapshot) to pick up a reload.
#[derive(Debug)]
pub struct SharedConfig {
    path: PathBuf,
    current: RwLock<Arc<SysConfig>>,
    pinned_mode: Option<RunMode>,
}

impl SharedConfig {
    pub fn new(path: impl Into<PathBuf>, initial: SysConfig) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(initial)),
            pinned_mode: None,
        }
    }

    /// Forces `mode` on the current value and on every later replace or
    /// reload, whatever the file says.
    pub fn pin_run_mode(mut self, mode: RunMode) -> Self {
        self.pinned_mode = Some(mode);
        let current = (*self.snapshot()).clone();
        self.replace(current);
        self
    }

    /// Loads the initial value from `path` (defaults if the file is missing).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let initial = SysConfig::load(&path)?;
        Ok(Self::new(path, initial))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<SysConfig> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }

    pub fn replace(&self, mut config: SysConfig) {
        if let Some(mode) = self.pinned_mode {
            config.server.is_run_in_server_less = mode == RunMode::Stateless;
        }
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(config);
    }

    /// Re-reads the backing file and swaps it in. On any error the previous
    /// value stays live and the error is returned for the caller to report.
    pub fn reload(&self) -> Result<()> {
        let fresh = SysConfig::from_file(&self.path)?;
        if *self.snapshot() != fresh {
            debug!("Config changed on disk, applying {}", self.path.display());
        }
        self.replace(fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_swaps_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nascore.toml");
        SysConfig::default().save(&path).unwrap();
        let shared = SharedConfig::load(&path).unwrap();
        let before = shared.snapshot();

        let mut edited = SysConfig::default();
        edited.server.is_run_in_server_less = true;
        edited.save(&path).unwrap();
        shared.reload().unwrap();

        // old snapshots keep their values
        assert_eq!(before.server.run_mode(), RunMode::Standalone);
        assert_eq!(shared.snapshot().server.run_mode(), RunMode::Stateless);
    }

    #[test]
    fn failed_reload_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nascore.toml");
        let mut config = SysConfig::default();
        config.third_party_ext.caddy2.auto_start_enable = true;
        config.save(&path).unwrap();
        let shared = SharedConfig::load(&path).unwrap();

        std::fs::write(&path, "[Server\nbroken = ").unwrap();
        assert!(shared.reload().is_err());
        assert!(shared.snapshot().third_party_ext.caddy2.auto_start_enable);

        std::fs::remove_file(&path).unwrap();
        assert!(shared.reload().is_err());
        assert!(shared.snapshot().third_party_ext.caddy2.auto_start_enable);
    }

    #[test]
    fn pinned_mode_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nascore.toml");
        SysConfig::default().save(&path).unwrap();

        let shared = SharedConfig::load(&path)
            .unwrap()
            .pin_run_mode(RunMode::Stateless);
        assert_eq!(shared.snapshot().server.run_mode(), RunMode::Stateless);

        shared.reload().unwrap();
        assert_eq!(shared.snapshot().server.run_mode(), RunMode::Stateless);
    }
}
