use super::clock::{Clock, IntervalTickSource, SystemClock, TickSource, Ticker};
use super::follow::{ExtensionFollowStart, FollowStart, FollowStarter};
use super::guard::{GuardSet, OwnedGuardPermit, SingletonGuard};
use super::locator::{ExtensionLocator, LaunchRule};
use super::mode::{Dispatch, ModeAdapter};
use super::platform::{self, PlatformPolicy};
use super::probe::{ExtensionHealth, ExtensionStatus, LivenessProbe};
use super::process::ProcessHandle;
use super::reload::SharedConfig;
use super::scheduler::{ScheduledAction, Scheduler};
use super::services::ServiceManager;
use crate::config::{RunMode, SysConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything that used to be process-global: guards and liveness results.
/// Each supervisor owns its own, so instances never share flags.
#[derive(Debug)]
pub struct SupervisorState {
    pub guards: Arc<GuardSet>,
    /// Claimed while the follow-start loop is alive (standalone) or while a
    /// stateless pass runs it
    pub loop_guard: Arc<SingletonGuard>,
    /// Same for the scheduled-activity loop
    pub cron_guard: Arc<SingletonGuard>,
    pub extensions: ExtensionStatus,
}

impl SupervisorState {
    pub fn new() -> Self {
        let guards = Arc::new(GuardSet::new());
        Self {
            loop_guard: guards.register("loop"),
            cron_guard: guards.register("cron"),
            guards,
            extensions: ExtensionStatus::new(),
        }
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    config: Arc<SharedConfig>,
    state: Arc<SupervisorState>,
    mode: ModeAdapter,
    follow: FollowStarter,
    scheduler: Scheduler,
    probe: LivenessProbe,
    rules: &'static [LaunchRule],
    ticks: Arc<dyn TickSource>,
    services: Arc<ServiceManager>,
}

/// Dual-mode supervisor. Call [`tick`](Self::tick) from every entry point.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

pub struct SupervisorBuilder {
    config: Arc<SharedConfig>,
    platform: Arc<dyn PlatformPolicy>,
    clock: Arc<dyn Clock>,
    ticks: Arc<dyn TickSource>,
    probe: LivenessProbe,
    search_paths: Option<Vec<PathBuf>>,
    follow_starts: Option<Vec<Arc<dyn FollowStart>>>,
    scheduled: Option<Vec<Arc<dyn ScheduledAction>>>,
}

impl SupervisorBuilder {
    pub fn platform(mut self, platform: Arc<dyn PlatformPolicy>) -> Self {
        self.platform = platform;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tick_source(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn probe(mut self, probe: LivenessProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Extension directories to scan instead of the environment-derived ones.
    pub fn search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = Some(paths);
        self
    }

    /// Replaces the standard follow-start table.
    pub fn follow_starts(mut self, actions: Vec<Arc<dyn FollowStart>>) -> Self {
        self.follow_starts = Some(actions);
        self
    }

    /// Replaces the standard scheduled-activity table.
    pub fn scheduled(mut self, actions: Vec<Arc<dyn ScheduledAction>>) -> Self {
        self.scheduled = Some(actions);
        self
    }

    pub fn build(self) -> Supervisor {
        let state = Arc::new(SupervisorState::new());
        let guards = &state.guards;

        let locator = Arc::new(ExtensionLocator::new(Arc::clone(&self.platform)));
        let rules = locator.rules();
        let services = Arc::new(ServiceManager::new(ProcessHandle::new(Arc::clone(
            &self.platform,
        ))));

        let follow = match self.follow_starts {
            Some(actions) => {
                let mut follow = FollowStarter::new();
                for action in actions {
                    follow.register(guards, action);
                }
                follow
            }
            None => match self.search_paths {
                None => FollowStarter::standard(guards, Arc::clone(&services), locator),
                Some(paths) => {
                    let mut follow =
                        FollowStarter::standard_services(guards, Arc::clone(&services));
                    let extensions = ExtensionFollowStart::new(locator).with_search_paths(paths);
                    follow.register(guards, Arc::new(extensions));
                    follow
                }
            },
        };

        let scheduler = match self.scheduled {
            Some(actions) => {
                let mut scheduler = Scheduler::new(Arc::clone(&self.clock));
                for action in actions {
                    scheduler.register(guards, action);
                }
                scheduler
            }
            None => Scheduler::standard(self.clock, guards, Arc::clone(&self.config)),
        };

        Supervisor {
            inner: Arc::new(Inner {
                mode: ModeAdapter::new(Arc::clone(guards)),
                config: self.config,
                state,
                follow,
                scheduler,
                probe: self.probe,
                rules,
                ticks: self.ticks,
                services,
            }),
        }
    }
}

impl Supervisor {
    pub fn builder(config: Arc<SharedConfig>) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            platform: platform::current(),
            clock: Arc::new(SystemClock),
            ticks: Arc::new(IntervalTickSource::default()),
            probe: LivenessProbe::default(),
            search_paths: None,
            follow_starts: None,
            scheduled: None,
        }
    }

    /// Standard tables on the host platform with real time.
    pub fn new(config: Arc<SharedConfig>) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Arc<SharedConfig> {
        &self.inner.config
    }

    pub fn state(&self) -> &Arc<SupervisorState> {
        &self.inner.state
    }

    pub fn services(&self) -> &Arc<ServiceManager> {
        &self.inner.services
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn extension_status(&self) -> HashMap<String, ExtensionHealth> {
        self.inner.state.extensions.snapshot()
    }

    /// One supervisor step.
    ///
    /// Stateless: resets every non-persistent guard, then synchronously refreshes extension
    /// liveness, runs the follow-start pass and the scheduled pass, in that
    /// order, and returns when all of it is done.
    ///
    /// Standalone: the first call spawns the follow-start loop and the
    /// scheduled-activity loop; later calls find their guards claimed and
    /// return immediately.
    pub async fn tick(&self) {
        let config = self.inner.config.snapshot();
        let mode = config.server.run_mode();
        let dispatch = self.inner.mode.prepare(mode);

        match mode {
            RunMode::Stateless => self.inner.stateless_pass(config, dispatch).await,
            RunMode::Standalone => self.spawn_loops(),
        }
    }

    /// Probes every known extension and replaces the liveness map.
    pub async fn check_extensions(&self) {
        let config = self.inner.config.snapshot();
        self.inner.check_extensions(&config).await;
    }

    fn spawn_loops(&self) {
        let state = &self.inner.state;

        if let Some(permit) = state.loop_guard.enter_owned() {
            // subscribe before spawning so no tick is missed
            let ticker = self.inner.ticks.ticker();
            info!("Spawning follow-start loop");
            tokio::spawn(follow_loop(Arc::clone(&self.inner), ticker, permit));
        }

        if let Some(permit) = state.cron_guard.enter_owned() {
            let ticker = self.inner.ticks.ticker();
            info!("Spawning scheduled-activity loop");
            tokio::spawn(cron_loop(Arc::clone(&self.inner), ticker, permit));
        }
    }
}

impl Inner {
    async fn stateless_pass(&self, config: Arc<SysConfig>, dispatch: Dispatch) {
        self.check_extensions(&config).await;

        if let Some(_permit) = self.state.loop_guard.enter() {
            self.follow.run_pass(Arc::clone(&config), dispatch).await;
        }
        if let Some(_permit) = self.state.cron_guard.enter() {
            self.scheduler.run_pass(config, dispatch).await;
        }
    }

    async fn check_extensions(&self, config: &SysConfig) {
        let socket_dir = config.server.socket_dir();
        let targets = self
            .rules
            .iter()
            .map(|rule| (rule.name.to_string(), rule.socket_path(&socket_dir)))
            .collect();
        let results = self.probe.probe_all(targets).await;
        self.state.extensions.replace_all(results);
    }

    fn still_standalone(&self) -> Option<Arc<SysConfig>> {
        let config = self.config.snapshot();
        match config.server.run_mode() {
            RunMode::Standalone => Some(config),
            RunMode::Stateless => None,
        }
    }
}

async fn follow_loop(inner: Arc<Inner>, mut ticker: Box<dyn Ticker>, _permit: OwnedGuardPermit) {
    while ticker.tick().await {
        let Some(config) = inner.still_standalone() else {
            info!("Switched to stateless mode, follow-start loop exiting");
            break;
        };
        inner
            .follow
            .run_pass(Arc::clone(&config), Dispatch::Background)
            .await;
        inner.check_extensions(&config).await;
    }
    debug!("Follow-start loop stopped");
}

async fn cron_loop(inner: Arc<Inner>, mut ticker: Box<dyn Ticker>, _permit: OwnedGuardPermit) {
    while ticker.tick().await {
        let Some(config) = inner.still_standalone() else {
            info!("Switched to stateless mode, scheduled-activity loop exiting");
            break;
        };
        inner.scheduler.run_pass(config, Dispatch::Background).await;
    }
    debug!("Scheduled-activity loop stopped");
}
