//! NasCore supervisor - keeps auxiliary NAS services running
//!
//! Handles:
//! - Follow-start of managed services (ddns-go, caddy2, openlist), remote
//!   mounts and self-daemonizing extensions
//! - Interval-gated activities (rule refresh, certificate renewal, config
//!   hot reload)
//! - Extension liveness over HTTP-on-Unix-socket
//!
//! # Execution modes
//!
//! The same [`Supervisor::tick`] serves two deployments:
//!
//! ```text
//! standalone:  tick ──► spawn follow loop ──► every tick: follow-starts, probe
//!                   └─► spawn cron loop   ──► every tick: scheduled activities
//!
//! stateless:   tick ──► reset guards ──► probe ──► follow-starts ──► scheduled
//!                       (all inline, returns when done)
//! ```

pub mod clock;
pub mod follow;
pub mod guard;
pub mod locator;
pub mod mode;
pub mod platform;
pub mod probe;
pub mod process;
pub mod reload;
pub mod runtime;
pub mod scheduler;
pub mod script;
pub mod services;
pub mod tasks;

pub use clock::{Clock, ManualClock, ManualTickSource, SystemClock, TickSource};
pub use guard::{GuardSet, SingletonGuard};
pub use locator::{ExtensionLocator, LaunchContext};
pub use mode::{Dispatch, ModeAdapter};
pub use platform::PlatformPolicy;
pub use probe::{ExtensionHealth, ExtensionStatus, LivenessProbe};
pub use process::{ManagedProcess, ProcessHandle};
pub use reload::SharedConfig;
pub use runtime::{Supervisor, SupervisorBuilder, SupervisorState};
pub use scheduler::{ScheduledActivity, Scheduler};
pub use services::{ServiceInfo, ServiceManager};
