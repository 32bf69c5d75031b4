//! Time sources for the supervisor.
//!
//! Interval gating uses wall-clock Unix seconds, not a monotonic clock: moving
//! the system clock backwards delays scheduled activities, moving it forwards
//! fires them early. Last-run times live only in memory, so every activity is
//! due immediately after a restart.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

pub trait Clock: Send + Sync {
    /// Current wall-clock time in Unix seconds.
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One iteration trigger for a background loop.
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick. Returns false once the source is gone and the
    /// loop should stop.
    async fn tick(&mut self) -> bool;
}

/// Hands out a fresh [`Ticker`] to each background loop.
pub trait TickSource: Send + Sync {
    fn ticker(&self) -> Box<dyn Ticker>;
}

/// Real-time ticks every `period`.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTickSource {
    period: Duration,
}

impl IntervalTickSource {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for IntervalTickSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TickSource for IntervalTickSource {
    fn ticker(&self) -> Box<dyn Ticker> {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(IntervalTicker { interval })
    }
}

struct IntervalTicker {
    interval: tokio::time::Interval,
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticks only when [`step`](Self::step) is called. Every ticker handed out
/// before a step observes that step.
pub struct ManualTickSource {
    sender: broadcast::Sender<()>,
}

impl ManualTickSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Releases one tick to every subscribed loop. Returns how many loops
    /// were listening.
    pub fn step(&self) -> usize {
        self.sender.send(()).unwrap_or(0)
    }

    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ManualTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ManualTickSource {
    fn ticker(&self) -> Box<dyn Ticker> {
        Box::new(ManualTicker {
            receiver: self.sender.subscribe(),
        })
    }
}

struct ManualTicker {
    receiver: broadcast::Receiver<()>,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        match self.receiver.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_unix(), 100);
        clock.advance(11);
        assert_eq!(clock.now_unix(), 111);
        clock.set(5);
        assert_eq!(clock.now_unix(), 5);
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.now_unix() > 1_600_000_000);
    }

    #[tokio::test]
    async fn manual_ticks_reach_every_subscriber() {
        let source = ManualTickSource::new();
        let mut a = source.ticker();
        let mut b = source.ticker();
        assert_eq!(source.step(), 2);
        assert!(a.tick().await);
        assert!(b.tick().await);
    }

    #[tokio::test]
    async fn manual_ticker_stops_when_source_dropped() {
        let source = ManualTickSource::new();
        let mut ticker = source.ticker();
        drop(source);
        assert!(!ticker.tick().await);
    }

    #[tokio::test]
    async fn interval_ticker_fires() {
        let source = IntervalTickSource::new(Duration::from_millis(10));
        let mut ticker = source.ticker();
        assert!(ticker.tick().await);
        assert!(ticker.tick().await);
    }
}
