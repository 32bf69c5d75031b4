use std::path::PathBuf;

const ENV_CONFIG: &str = "NASCORE_CONFIG";
const ENV_EXTENDED_PATH: &str = "NASCORE_EXTENDED_PATH";
/// Misspelled name still set by existing appliance deployments
const ENV_EXTENDED_PATH_LEGACY: &str = "NASCOTE_EXTENDED_PATH";
const ENV_DEV_MODE: &str = "NASCORE_DEV_MODE";

const LOCAL_CONFIG_FILE: &str = "./nascore.toml";
const CONFIG_FILE_NAME: &str = "nascore.toml";
const NASCORE_SUBDIR: &str = "nascore";
const FALLBACK_CONFIG_DIR: &str = "~/.config";

/// Extension directory scanned only in development mode.
pub const DEV_EXTENSION_DIR: &str = "../nascore_vod";

/// Subdirectory next to the binary that holds bundled extensions.
pub const EXTENDED_SUBDIR: &str = "extended";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Config file path ($NASCORE_CONFIG, ./nascore.toml if present, else ~/.config/nascore/nascore.toml)
pub fn config_path() -> PathBuf {
    let path = env_opt(ENV_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let local = PathBuf::from(LOCAL_CONFIG_FILE);
            if local.exists() {
                return local;
            }
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(NASCORE_SUBDIR)
                .join(CONFIG_FILE_NAME)
        });
    tracing::trace!(path = %path.display(), "Resolved config path");
    path
}

/// Extra extension scan directory ($NASCORE_EXTENDED_PATH, falling back to
/// $NASCOTE_EXTENDED_PATH)
pub fn extended_path() -> Option<PathBuf> {
    let val = pick_extended_path(env_opt(ENV_EXTENDED_PATH), env_opt(ENV_EXTENDED_PATH_LEGACY));
    tracing::trace!(value = ?val, "NASCORE_EXTENDED_PATH env var");
    val
}

fn pick_extended_path(current: Option<String>, legacy: Option<String>) -> Option<PathBuf> {
    if current.is_none() && legacy.is_some() {
        tracing::debug!("Using legacy {} for the extension path", ENV_EXTENDED_PATH_LEGACY);
    }
    current.or(legacy).map(PathBuf::from)
}

/// Development mode ($NASCORE_DEV_MODE=1|true)
pub fn is_dev_mode() -> bool {
    let dev = env_opt(ENV_DEV_MODE).is_some_and(|v| is_truthy(&v));
    tracing::trace!(dev = dev, "Development mode check");
    dev
}

/// Directory containing the running binary
pub fn executable_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(PathBuf::from)
}

/// Ordered extension search directories: binary dir, its `extended/`
/// subdirectory, $NASCORE_EXTENDED_PATH, and the development directory.
pub fn extension_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = executable_dir() {
        paths.push(dir.join(EXTENDED_SUBDIR));
        paths.insert(0, dir);
    }
    if let Some(extra) = extended_path() {
        paths.push(extra);
    }
    if is_dev_mode() {
        paths.push(PathBuf::from(DEV_EXTENSION_DIR));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
    }

    #[test]
    fn search_paths_start_with_binary_dir() {
        let paths = extension_search_paths();
        let exe_dir = executable_dir().unwrap();
        assert_eq!(paths[0], exe_dir);
        assert_eq!(paths[1], exe_dir.join(EXTENDED_SUBDIR));
    }

    #[test]
    fn legacy_extended_path_is_a_fallback() {
        assert_eq!(
            pick_extended_path(None, Some("/opt/ext".into())),
            Some(PathBuf::from("/opt/ext"))
        );
        assert_eq!(
            pick_extended_path(Some("/srv/ext".into()), Some("/opt/ext".into())),
            Some(PathBuf::from("/srv/ext"))
        );
        assert_eq!(pick_extended_path(None, None), None);
    }
}
