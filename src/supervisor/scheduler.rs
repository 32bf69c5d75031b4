//! Interval-gated periodic activities.
//!
//! An activity fires when `now - last_run > interval` (strictly greater) and
//! its feature toggle is on. `last_run` moves to the tick's `now` once the
//! action finishes, whether it succeeded or not, so a failing download waits a
//! full interval before the next attempt. See [`super::clock`] for the
//! wall-clock caveats.

use super::clock::Clock;
use super::guard::{GuardSet, SingletonGuard};
use super::mode::Dispatch;
use super::reload::SharedConfig;
use super::tasks;
use crate::config::SysConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

const SECS_PER_HOUR: i64 = 3600;

/// Whether an activity may run and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    pub enabled: bool,
    pub interval_secs: i64,
}

impl Gate {
    pub fn hours(enabled: bool, hours: u64) -> Self {
        Self {
            enabled,
            interval_secs: i64::try_from(hours)
                .unwrap_or(i64::MAX)
                .saturating_mul(SECS_PER_HOUR),
        }
    }
}

#[async_trait]
pub trait ScheduledAction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads the toggle and interval from the current config.
    fn gate(&self, config: &SysConfig) -> Gate;

    async fn run(&self, config: Arc<SysConfig>) -> Result<()>;

    /// When true the activity's guard is not cleared by a stateless tick, so
    /// a run in progress is never re-entered by a concurrent request.
    fn exclusive_across_ticks(&self) -> bool {
        false
    }
}

/// One row of the periodic-task table.
pub struct ScheduledActivity {
    guard: Arc<SingletonGuard>,
    last_run: AtomicI64,
    action: Arc<dyn ScheduledAction>,
}

impl ScheduledActivity {
    pub fn name(&self) -> &'static str {
        self.action.name()
    }

    /// Unix seconds of the last completed run; 0 means never.
    pub fn last_run(&self) -> i64 {
        self.last_run.load(Ordering::Acquire)
    }

    pub fn mark_run(&self, now: i64) {
        self.last_run.store(now, Ordering::Release);
    }

    pub fn is_due(&self, now: i64, interval_secs: i64) -> bool {
        now.saturating_sub(self.last_run()) > interval_secs
    }

    pub fn guard(&self) -> &Arc<SingletonGuard> {
        &self.guard
    }
}

pub struct Scheduler {
    activities: Vec<Arc<ScheduledActivity>>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            activities: Vec::new(),
            clock,
        }
    }

    /// The standard table: rule refresh, certificate renewal, config reload.
    pub fn standard(clock: Arc<dyn Clock>, guards: &GuardSet, config: Arc<SharedConfig>) -> Self {
        let mut scheduler = Self::new(clock);
        scheduler.register(guards, Arc::new(RuleRefresh));
        scheduler.register(guards, Arc::new(CertificateRenewal));
        scheduler.register(guards, Arc::new(ConfigReload::new(config)));
        scheduler
    }

    /// Appends an activity; its guard is registered as `cron:<name>`.
    pub fn register(&mut self, guards: &GuardSet, action: Arc<dyn ScheduledAction>) {
        let name = format!("cron:{}", action.name());
        let guard = if action.exclusive_across_ticks() {
            guards.register_persistent(&name)
        } else {
            guards.register(&name)
        };
        self.activities.push(Arc::new(ScheduledActivity {
            guard,
            last_run: AtomicI64::new(0),
            action,
        }));
    }

    pub fn activities(&self) -> &[Arc<ScheduledActivity>] {
        &self.activities
    }

    pub fn activity(&self, name: &str) -> Option<&Arc<ScheduledActivity>> {
        self.activities.iter().find(|a| a.name() == name)
    }

    /// Evaluates every activity once, in table order. Returns how many were
    /// started.
    pub async fn run_pass(&self, config: Arc<SysConfig>, dispatch: Dispatch) -> usize {
        let now = self.clock.now_unix();
        let mut started = 0;

        for activity in &self.activities {
            let gate = activity.action.gate(&config);
            if !gate.enabled || !activity.is_due(now, gate.interval_secs) {
                continue;
            }
            let Some(permit) = activity.guard.enter_owned() else {
                debug!(activity = activity.name(), "Still running, skipping");
                continue;
            };

            info!(activity = activity.name(), "Starting scheduled activity");
            started += 1;

            let activity = Arc::clone(activity);
            let config = Arc::clone(&config);
            dispatch
                .run(async move {
                    if let Err(e) = activity.action.run(config).await {
                        error!(activity = activity.name(), "Scheduled activity failed: {}", e);
                    }
                    activity.mark_run(now);
                    drop(permit);
                })
                .await;
        }

        started
    }
}

/// Downloads the AdGuard upstream rule list.
pub struct RuleRefresh;

#[async_trait]
impl ScheduledAction for RuleRefresh {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn gate(&self, config: &SysConfig) -> Gate {
        let ad_guard = &config.third_party_ext.ad_guard;
        Gate::hours(
            ad_guard.auto_update_rules_enable,
            ad_guard.auto_update_rules_interval,
        )
    }

    async fn run(&self, config: Arc<SysConfig>) -> Result<()> {
        tasks::refresh_rules(&config).await
    }
}

/// Runs the ACME renew-or-obtain script.
pub struct CertificateRenewal;

#[async_trait]
impl ScheduledAction for CertificateRenewal {
    fn name(&self) -> &'static str {
        "certs"
    }

    fn gate(&self, config: &SysConfig) -> Gate {
        let lego = &config.third_party_ext.acme_lego;
        Gate::hours(lego.is_lego_auto_renew, lego.auto_update_check_interval)
    }

    async fn run(&self, config: Arc<SysConfig>) -> Result<()> {
        tasks::renew_certificates(&config).await
    }
}

/// Hot-reloads the config file into the shared handle.
pub struct ConfigReload {
    shared: Arc<SharedConfig>,
}

impl ConfigReload {
    pub fn new(shared: Arc<SharedConfig>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl ScheduledAction for ConfigReload {
    fn name(&self) -> &'static str {
        "reload"
    }

    fn gate(&self, config: &SysConfig) -> Gate {
        Gate {
            enabled: true,
            interval_secs: i64::try_from(config.server.config_reload_interval_secs)
                .unwrap_or(i64::MAX),
        }
    }

    async fn run(&self, _config: Arc<SysConfig>) -> Result<()> {
        self.shared.reload()
    }

    fn exclusive_across_ticks(&self) -> bool {
        true
    }
}
