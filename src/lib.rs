pub mod clienv;
pub mod config;
pub mod error;
pub mod supervisor;

pub use config::{RunMode, SysConfig};
pub use error::{Result, SupervisorError};
pub use supervisor::{SharedConfig, Supervisor};
