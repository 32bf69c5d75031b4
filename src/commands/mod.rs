pub(crate) mod config;
pub(crate) mod extensions;
pub(crate) mod run;
pub(crate) mod service;

use anyhow::Context;
use nascore_supervisor::{RunMode, SharedConfig, SysConfig};
use std::path::Path;
use std::sync::Arc;

pub(crate) fn load_config(
    path: &Path,
    pinned: Option<RunMode>,
) -> anyhow::Result<Arc<SharedConfig>> {
    let mut shared = SharedConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(mode) = pinned {
        shared = shared.pin_run_mode(mode);
    }
    Ok(Arc::new(shared))
}

pub(crate) fn load_snapshot(path: &Path) -> anyhow::Result<SysConfig> {
    SysConfig::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}
