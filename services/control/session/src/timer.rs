//! Periodic timer facility used to drive the keep-alive heartbeat.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Identifies a timer registered with a [`TimerManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap an id issued by a [`TimerManager`] implementation
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id of the timer
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Callback run on every tick
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Schedules periodic callbacks
pub trait TimerManager: Send + Sync {
    /// Register `callback` to run every `interval`, first after `initial_delay`.
    ///
    /// With `auto_start` false the timer stays idle until [`start_timer`](Self::start_timer).
    fn add_periodic_timer(
        &self,
        callback: TimerCallback,
        interval: Duration,
        auto_start: bool,
        initial_delay: Duration,
    ) -> TimerHandle;

    /// Start an idle timer; false if unknown or already running
    fn start_timer(&self, handle: TimerHandle) -> bool;

    /// Cancel and forget a timer; false if unknown
    fn remove_timer(&self, handle: TimerHandle) -> bool;
}

struct TimerSpec {
    callback: TimerCallback,
    interval: Duration,
    initial_delay: Duration,
}

enum TimerEntry {
    Idle(TimerSpec),
    Running(JoinHandle<()>),
}

/// [`TimerManager`] backed by tokio tasks, one per timer
#[derive(Default)]
pub struct TokioTimerManager {
    next_id: AtomicU64,
    timers: DashMap<TimerHandle, TimerEntry>,
}

impl TokioTimerManager {
    /// Create a manager with no timers
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(handle: TimerHandle, spec: TimerSpec) -> JoinHandle<()> {
        debug!("Timer {:?} started with period {:?}", handle, spec.interval);
        // tokio intervals panic on a zero period
        let period = spec.interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + spec.initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                (spec.callback)();
            }
        })
    }
}

impl TimerManager for TokioTimerManager {
    fn add_periodic_timer(
        &self,
        callback: TimerCallback,
        interval: Duration,
        auto_start: bool,
        initial_delay: Duration,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let spec = TimerSpec {
            callback,
            interval,
            initial_delay,
        };

        let entry = if auto_start {
            TimerEntry::Running(Self::spawn(handle, spec))
        } else {
            TimerEntry::Idle(spec)
        };
        self.timers.insert(handle, entry);
        handle
    }

    fn start_timer(&self, handle: TimerHandle) -> bool {
        match self.timers.remove(&handle) {
            Some((_, TimerEntry::Idle(spec))) => {
                self.timers
                    .insert(handle, TimerEntry::Running(Self::spawn(handle, spec)));
                true
            }
            Some((handle, running)) => {
                self.timers.insert(handle, running);
                false
            }
            None => false,
        }
    }

    fn remove_timer(&self, handle: TimerHandle) -> bool {
        match self.timers.remove(&handle) {
            Some((_, TimerEntry::Running(task))) => {
                task.abort();
                debug!("Timer {:?} removed", handle);
                true
            }
            Some((_, TimerEntry::Idle(_))) => true,
            None => false,
        }
    }
}

impl Drop for TokioTimerManager {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            if let TimerEntry::Running(task) = entry.value() {
                task.abort();
            }
        }
    }
}
