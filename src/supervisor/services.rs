use super::process::{ManagedProcess, ProcessHandle};
use crate::config::SysConfig;
use crate::error::{Result, SupervisorError};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// A pidfile-managed auxiliary binary.
pub struct ServiceSpec {
    pub name: &'static str,
    /// File name inside the configured temp dir
    pub pid_file: &'static str,
    enabled: fn(&SysConfig) -> bool,
    proxy_enabled: fn(&SysConfig) -> bool,
    bin_path: fn(&SysConfig) -> &str,
    args: fn(&SysConfig) -> Vec<String>,
}

impl ServiceSpec {
    pub fn enabled(&self, config: &SysConfig) -> bool {
        (self.enabled)(config)
    }

    pub fn proxy_enabled(&self, config: &SysConfig) -> bool {
        (self.proxy_enabled)(config)
    }

    pub fn bin_path<'a>(&self, config: &'a SysConfig) -> &'a str {
        (self.bin_path)(config)
    }

    pub fn args(&self, config: &SysConfig) -> Vec<String> {
        (self.args)(config)
    }

    pub fn pid_file_path(&self, config: &SysConfig) -> PathBuf {
        config.server.temp_dir().join(self.pid_file)
    }
}

fn never(_: &SysConfig) -> bool {
    false
}

pub static SERVICES: &[ServiceSpec] = &[
    ServiceSpec {
        name: "ddns-go",
        pid_file: "nascore_ddnsgo.pid",
        enabled: |c| c.third_party_ext.ddns_go.auto_start_enable,
        proxy_enabled: |c| c.third_party_ext.ddns_go.is_proxy_enable,
        bin_path: |c| c.third_party_ext.ddns_go.bin_path.as_str(),
        args: |c| vec!["-c".into(), c.third_party_ext.ddns_go.config_file_path.clone()],
    },
    ServiceSpec {
        name: "caddy2",
        pid_file: "nascore_caddy2.pid",
        enabled: |c| c.third_party_ext.caddy2.auto_start_enable,
        proxy_enabled: never,
        bin_path: |c| c.third_party_ext.caddy2.bin_path.as_str(),
        args: |c| {
            vec![
                "run".into(),
                "--config".into(),
                c.third_party_ext.caddy2.config_path.clone(),
            ]
        },
    },
    ServiceSpec {
        name: "openlist",
        pid_file: "nascore_openlist.pid",
        enabled: |c| c.third_party_ext.openlist.auto_start_enable,
        proxy_enabled: never,
        bin_path: |c| c.third_party_ext.openlist.bin_path.as_str(),
        args: |c| {
            vec![
                "server".into(),
                "--data".into(),
                c.third_party_ext.openlist.data_path.clone(),
            ]
        },
    },
];

pub fn find_service(name: &str) -> Option<&'static ServiceSpec> {
    SERVICES.iter().find(|s| s.name == name)
}

/// Status row for one managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub enabled: bool,
    pub proxy_enabled: bool,
    pub pid: Option<u32>,
    pub alive: bool,
}

/// Start/stop/status for the services in [`SERVICES`], keyed by name.
#[derive(Clone)]
pub struct ServiceManager {
    process: ProcessHandle,
}

impl ServiceManager {
    pub fn new(process: ProcessHandle) -> Self {
        Self { process }
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    fn spec(name: &str) -> Result<&'static ServiceSpec> {
        find_service(name).ok_or_else(|| SupervisorError::UnknownService(name.to_string()))
    }

    fn command(&self, spec: &ServiceSpec, config: &SysConfig) -> (PathBuf, Vec<String>) {
        let binary = self.process.platform().binary_path(spec.bin_path(config));
        (binary, spec.args(config))
    }

    /// Starts a service unless its pidfile names a live process.
    pub async fn start(&self, name: &str, config: &SysConfig) -> Result<ManagedProcess> {
        let spec = Self::spec(name)?;
        let pid_file = spec.pid_file_path(config);

        if let Some((pid, true)) = self.process.status(&pid_file).await {
            return Err(SupervisorError::AlreadyRunning {
                service: name.to_string(),
                pid,
            });
        }

        let (binary, args) = self.command(spec, config);
        self.process.start(&binary, &args, &pid_file).await
    }

    pub async fn stop(&self, name: &str, config: &SysConfig) -> Result<()> {
        let spec = Self::spec(name)?;
        info!(service = %name, "Stopping service");
        self.process.kill(&spec.pid_file_path(config)).await;
        Ok(())
    }

    /// Kills whatever the pidfile names, then starts afresh. This is the
    /// follow-start sequence.
    pub async fn restart(&self, name: &str, config: &SysConfig) -> Result<ManagedProcess> {
        let spec = Self::spec(name)?;
        let (binary, args) = self.command(spec, config);
        info!(service = %name, "Restarting {}", binary.display());
        self.process
            .restart(&binary, &args, &spec.pid_file_path(config))
            .await
    }

    pub async fn list(&self, config: &SysConfig) -> Vec<ServiceInfo> {
        let mut rows = Vec::with_capacity(SERVICES.len());
        for spec in SERVICES {
            let status = self.process.status(&spec.pid_file_path(config)).await;
            rows.push(ServiceInfo {
                name: spec.name.to_string(),
                enabled: spec.enabled(config),
                proxy_enabled: spec.proxy_enabled(config),
                pid: status.map(|(pid, _)| pid),
                alive: status.is_some_and(|(_, alive)| alive),
            });
        }
        rows
    }
}
