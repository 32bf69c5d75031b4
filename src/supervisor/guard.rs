use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// At-most-one-concurrent-execution flag.
///
/// `Idle -> Running` happens only through a compare-and-swap, so any number of
/// racing callers observe exactly one winner until the flag is released.
#[derive(Debug)]
pub struct SingletonGuard {
    name: String,
    running: AtomicBool,
}

impl SingletonGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically claims the flag. Returns false if it is already held.
    pub fn try_enter(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the flag unconditionally.
    pub fn exit(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Clears the flag regardless of who holds it. Only the stateless tick
    /// calls this, before re-evaluating every activity.
    pub fn force_reset(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::trace!(guard = %self.name, "Guard force-reset");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claims the flag and returns a permit that releases it on drop,
    /// including during unwinding.
    pub fn enter(&self) -> Option<GuardPermit<'_>> {
        self.try_enter().then_some(GuardPermit { guard: self })
    }

    /// Like [`enter`](Self::enter) but the permit can move into a spawned task.
    pub fn enter_owned(self: &Arc<Self>) -> Option<OwnedGuardPermit> {
        self.try_enter().then(|| OwnedGuardPermit {
            guard: Some(Arc::clone(self)),
        })
    }
}

#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct GuardPermit<'a> {
    guard: &'a SingletonGuard,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.exit();
    }
}

#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct OwnedGuardPermit {
    guard: Option<Arc<SingletonGuard>>,
}

impl OwnedGuardPermit {
    /// Keeps the flag claimed past the permit's lifetime.
    pub fn latch(mut self) {
        self.guard = None;
    }
}

impl Drop for OwnedGuardPermit {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.exit();
        }
    }
}

/// Registry of every guard owned by one supervisor, so the stateless tick can
/// reset all of them at once. Guards registered as persistent are left alone
/// by [`reset_all`](Self::reset_all).
#[derive(Debug, Default)]
pub struct GuardSet {
    guards: Mutex<Vec<Registered>>,
}

#[derive(Debug)]
struct Registered {
    guard: Arc<SingletonGuard>,
    persistent: bool,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the guard named `name`, creating it on first use.
    pub fn register(&self, name: &str) -> Arc<SingletonGuard> {
        self.insert(name, false)
    }

    /// Like [`register`](Self::register), but the guard is never cleared by
    /// [`reset_all`](Self::reset_all): a holder keeps it until it finishes.
    pub fn register_persistent(&self, name: &str) -> Arc<SingletonGuard> {
        self.insert(name, true)
    }

    fn insert(&self, name: &str, persistent: bool) -> Arc<SingletonGuard> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = guards.iter_mut().find(|r| r.guard.name() == name) {
            existing.persistent |= persistent;
            return Arc::clone(&existing.guard);
        }
        let guard = Arc::new(SingletonGuard::new(name));
        guards.push(Registered {
            guard: Arc::clone(&guard),
            persistent,
        });
        guard
    }

    pub fn get(&self, name: &str) -> Option<Arc<SingletonGuard>> {
        let guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        guards
            .iter()
            .find(|r| r.guard.name() == name)
            .map(|r| Arc::clone(&r.guard))
    }

    pub fn reset_all(&self) {
        let guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        for registered in guards.iter().filter(|r| !r.persistent) {
            registered.guard.force_reset();
        }
    }

    pub fn names(&self) -> Vec<String> {
        let guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        guards.iter().map(|r| r.guard.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn exactly_one_concurrent_enter_wins() {
        const N: usize = 32;
        let guard = Arc::new(SingletonGuard::new("cron"));
        let barrier = Arc::new(Barrier::new(N));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    barrier.wait();
                    if guard.try_enter() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(guard.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_single_winner() {
        let guard = Arc::new(SingletonGuard::new("loop"));
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let guard = Arc::clone(&guard);
            set.spawn(async move { guard.try_enter() });
        }
        let mut wins = 0;
        while let Some(res) = set.join_next().await {
            if res.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[test]
    fn exit_allows_reentry() {
        let guard = SingletonGuard::new("reload");
        assert!(guard.try_enter());
        assert!(!guard.try_enter());
        guard.exit();
        assert!(guard.try_enter());
    }

    #[test]
    fn force_reset_clears_held_flag() {
        let guard = SingletonGuard::new("ddns-go");
        assert!(guard.try_enter());
        guard.force_reset();
        assert!(!guard.is_running());
        assert!(guard.try_enter());
    }

    #[test]
    fn permit_releases_on_drop() {
        let guard = SingletonGuard::new("cron");
        {
            let _permit = guard.enter().unwrap();
            assert!(guard.enter().is_none());
        }
        assert!(!guard.is_running());
    }

    #[test]
    fn permit_releases_on_panic() {
        let guard = Arc::new(SingletonGuard::new("cron"));
        let inner = Arc::clone(&guard);
        let result = std::panic::catch_unwind(move || {
            let _permit = inner.enter().unwrap();
            panic!("action failed");
        });
        assert!(result.is_err());
        assert!(!guard.is_running());
    }

    #[test]
    fn latched_permit_stays_claimed() {
        let guard = Arc::new(SingletonGuard::new("caddy2"));
        guard.enter_owned().unwrap().latch();
        assert!(guard.is_running());
        assert!(guard.enter_owned().is_none());
    }

    #[test]
    fn guard_set_reuses_and_resets() {
        let set = GuardSet::new();
        let a = set.register("loop");
        let b = set.register("loop");
        assert!(Arc::ptr_eq(&a, &b));

        let c = set.register("cron");
        assert!(a.try_enter());
        assert!(c.try_enter());
        set.reset_all();
        assert!(!a.is_running());
        assert!(!c.is_running());
        assert_eq!(set.names(), vec!["loop".to_string(), "cron".to_string()]);
        assert!(set.get("missing").is_none());
    }

    #[test]
    fn persistent_guard_survives_reset_all() {
        let set = GuardSet::new();
        let reload = set.register_persistent("cron:reload");
        let follow = set.register("follow:caddy2");
        assert!(reload.try_enter());
        assert!(follow.try_enter());

        set.reset_all();
        assert!(reload.is_running());
        assert!(!follow.is_running());

        reload.exit();
        assert!(reload.try_enter());
    }
}
