use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Whether background loops may outlive a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Long-lived process; background loops persist across ticks.
    Standalone,
    /// Request-triggered instance; every tick re-derives all periodic work.
    Stateless,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Standalone => "standalone",
            RunMode::Stateless => "stateless",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct SysConfig {
    pub server: ServerConfig,
    pub third_party_ext: ThirdPartyExt,
    pub extensions: ExtensionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerConfig {
    /// Stateless (serverless) deployment: no background loops survive a request
    pub is_run_in_server_less: bool,
    /// Directory holding extension sockets
    pub unix_socket_file_path: String,
    /// Directory for pidfiles; empty means the OS temp directory
    pub temp_file_path: String,
    /// Minimum seconds between config hot reloads
    pub config_reload_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            is_run_in_server_less: false,
            unix_socket_file_path: "/tmp/nascore_socket/".to_string(),
            temp_file_path: String::new(),
            config_reload_interval_secs: 0,
        }
    }
}

impl ServerConfig {
    pub fn run_mode(&self) -> RunMode {
        if self.is_run_in_server_less {
            RunMode::Stateless
        } else {
            RunMode::Standalone
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        if self.temp_file_path.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.temp_file_path)
        }
    }

    pub fn socket_dir(&self) -> PathBuf {
        PathBuf::from(&self.unix_socket_file_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ThirdPartyExt {
    #[serde(rename = "GitHubDownloadMirror")]
    pub github_download_mirror: String,
    pub rclone: RcloneConfig,
    #[serde(rename = "DdnsGO")]
    pub ddns_go: DdnsGoConfig,
    pub ad_guard: AdGuardConfig,
    pub acme_lego: AcmeLegoConfig,
    pub caddy2: Caddy2Config,
    pub openlist: OpenlistConfig,
}

impl Default for ThirdPartyExt {
    fn default() -> Self {
        Self {
            github_download_mirror: "https://github.akams.cn/".to_string(),
            rclone: RcloneConfig::default(),
            ddns_go: DdnsGoConfig::default(),
            ad_guard: AdGuardConfig::default(),
            acme_lego: AcmeLegoConfig::default(),
            caddy2: Caddy2Config::default(),
            openlist: OpenlistConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct RcloneConfig {
    pub auto_mount_enable: bool,
    pub auto_mount_command: String,
    pub auto_un_mount_command: String,
    pub bin_path: String,
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            auto_mount_enable: false,
            auto_mount_command: String::new(),
            auto_un_mount_command: String::new(),
            bin_path: "./ThirdPartyExt/rclone".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DdnsGoConfig {
    pub auto_start_enable: bool,
    #[serde(rename = "IsDDnsGOProxyEnable")]
    pub is_proxy_enable: bool,
    pub reverseproxy_url: String,
    pub config_file_path: String,
    pub bin_path: String,
}

impl Default for DdnsGoConfig {
    fn default() -> Self {
        Self {
            auto_start_enable: false,
            is_proxy_enable: false,
            reverseproxy_url: "http://localhost:9876/".to_string(),
            config_file_path: "./ThirdPartyExt/ddnsgo_config.yaml".to_string(),
            bin_path: "./ThirdPartyExt/ddns-go".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AdGuardConfig {
    pub is_ad_guard_proxy_enable: bool,
    pub reverseproxy_url: String,
    #[serde(rename = "Upstream_dns_file")]
    pub upstream_dns_file: String,
    #[serde(rename = "Upstream_dns_fileUpdateUrl")]
    pub upstream_dns_file_update_url: String,
    pub auto_update_rules_enable: bool,
    /// Hours
    pub auto_update_rules_interval: u64,
}

impl Default for AdGuardConfig {
    fn default() -> Self {
        Self {
            is_ad_guard_proxy_enable: false,
            reverseproxy_url: "http://192.168.1.1:3000/".to_string(),
            upstream_dns_file: "./adguard_upstream_dns_file.txt".to_string(),
            upstream_dns_file_update_url: "https://raw.githubusercontent.com/joyanhui/adguardhome-rules/refs/heads/release_file/ADG_chinaDirect_WinUpdate_Gfw.txt".to_string(),
            auto_update_rules_enable: false,
            auto_update_rules_interval: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AcmeLegoConfig {
    pub is_lego_auto_renew: bool,
    pub bin_path: String,
    /// Hours
    pub auto_update_check_interval: u64,
    pub command: String,
    #[serde(rename = "LEGO_PATH")]
    pub lego_path: String,
}

impl Default for AcmeLegoConfig {
    fn default() -> Self {
        Self {
            is_lego_auto_renew: false,
            bin_path: "./ThirdPartyExt/lego".to_string(),
            auto_update_check_interval: 24,
            command: concat!(
                "export LEGO_EMAIL=\"you@example.com\"\n",
                "export LEGO_PATH=${LEGO_PATH}\n",
                "export CF_DNS_API_TOKEN=your-cloudflare-token\n",
                "${BinPath} --dns cloudflare -d example.com -d *.example.com --key-type ec256 run &nascore\n",
            )
            .to_string(),
            lego_path: "./ThirdPartyExt/lego_cert".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Caddy2Config {
    pub auto_start_enable: bool,
    pub bin_path: String,
    pub config_path: String,
}

impl Default for Caddy2Config {
    fn default() -> Self {
        Self {
            auto_start_enable: false,
            bin_path: "./ThirdPartyExt/caddy".to_string(),
            config_path: "./ThirdPartyExt/Caddyfile".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct OpenlistConfig {
    pub auto_start_enable: bool,
    pub bin_path: String,
    pub data_path: String,
}

impl Default for OpenlistConfig {
    fn default() -> Self {
        Self {
            auto_start_enable: false,
            bin_path: "./ThirdPartyExt/openlist".to_string(),
            data_path: "./ThirdPartyExt/openlist_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExtensionsConfig {
    /// File extensions never treated as extension executables (no leading dot)
    pub ignore_extensions: Vec<String>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        let ignored = [
            "toml", "yaml", "yml", "json", "conf", "ini", "txt", "md", "log", "pid", "socket",
            "sock", "db", "gz", "zip", "tar", "xz",
        ];
        Self {
            ignore_extensions: ignored.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SysConfig {
    /// Loads the config at `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading config");

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        Self::from_file(path)
    }

    /// Parses the config at `path`; a missing file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SupervisorError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;

        tracing::trace!(
            run_mode = %config.server.run_mode(),
            "Config loaded from {}",
            path.display()
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "Saving config");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_standalone() {
        let config = SysConfig::default();
        assert_eq!(config.server.run_mode(), RunMode::Standalone);
        assert!(!config.third_party_ext.ddns_go.auto_start_enable);
        assert_eq!(config.third_party_ext.ad_guard.auto_update_rules_interval, 48);
        assert!(config.extensions.ignore_extensions.contains(&"txt".to_string()));
    }

    #[test]
    fn parses_appliance_keys() {
        let toml = r#"
[Server]
IsRunInServerLess = true
UnixSocketFilePath = "/run/nascore/"

[ThirdPartyExt]
GitHubDownloadMirror = "https://mirror.example/"

[ThirdPartyExt.DdnsGO]
AutoStartEnable = true
IsDDnsGOProxyEnable = true
BinPath = "/opt/ddns-go"

[ThirdPartyExt.AdGuard]
AutoUpdateRulesEnable = true
AutoUpdateRulesInterval = 12
Upstream_dns_file = "/etc/adguard/upstream.txt"

[ThirdPartyExt.AcmeLego]
IsLegoAutoRenew = true
LEGO_PATH = "/var/lib/lego"
"#;
        let config: SysConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.run_mode(), RunMode::Stateless);
        assert_eq!(config.server.socket_dir(), PathBuf::from("/run/nascore/"));
        let ext = &config.third_party_ext;
        assert_eq!(ext.github_download_mirror, "https://mirror.example/");
        assert!(ext.ddns_go.auto_start_enable);
        assert!(ext.ddns_go.is_proxy_enable);
        assert_eq!(ext.ddns_go.bin_path, "/opt/ddns-go");
        assert_eq!(ext.ad_guard.auto_update_rules_interval, 12);
        assert_eq!(ext.ad_guard.upstream_dns_file, "/etc/adguard/upstream.txt");
        assert!(ext.acme_lego.is_lego_auto_renew);
        assert_eq!(ext.acme_lego.lego_path, "/var/lib/lego");
        // untouched sections keep their defaults
        assert_eq!(ext.caddy2, Caddy2Config::default());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SysConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SysConfig::default());
        assert!(SysConfig::from_file(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("nascore.toml");
        let mut config = SysConfig::default();
        config.server.is_run_in_server_less = true;
        config.third_party_ext.caddy2.auto_start_enable = true;
        config.save(&path).unwrap();

        let loaded = SysConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn empty_temp_path_uses_os_temp_dir() {
        let server = ServerConfig::default();
        assert_eq!(server.temp_dir(), std::env::temp_dir());
    }
}
