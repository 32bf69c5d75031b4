use super::guard::GuardSet;
use crate::config::RunMode;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// Where a potentially slow action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Awaited by the caller; the tick returns only after it finishes.
    Inline,
    /// Spawned onto its own task so the tick loop never stalls.
    Background,
}

impl Dispatch {
    pub fn for_mode(mode: RunMode) -> Self {
        match mode {
            RunMode::Stateless => Dispatch::Inline,
            RunMode::Standalone => Dispatch::Background,
        }
    }

    /// Runs `task` according to this dispatch. Must be called from within a
    /// Tokio runtime.
    pub async fn run<F>(self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Dispatch::Inline => task.await,
            Dispatch::Background => {
                tokio::spawn(task);
            }
        }
    }
}

/// Decides per tick how work is dispatched, and wipes every resettable guard first when
/// the tick may be running in a fresh stateless instance.
#[derive(Debug, Clone)]
pub struct ModeAdapter {
    guards: Arc<GuardSet>,
}

impl ModeAdapter {
    pub fn new(guards: Arc<GuardSet>) -> Self {
        Self { guards }
    }

    pub fn guards(&self) -> &Arc<GuardSet> {
        &self.guards
    }

    pub fn prepare(&self, mode: RunMode) -> Dispatch {
        if mode == RunMode::Stateless {
            trace!(guards = ?self.guards.names(), "Stateless tick, resetting guards");
            self.guards.reset_all();
        }
        Dispatch::for_mode(mode)
    }
}
