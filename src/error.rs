use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to launch '{binary}': {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("service '{service}' is already running with PID {pid}")]
    AlreadyRunning { service: String, pid: u32 },

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("command '{command}' failed: {reason}")]
    Command { command: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
