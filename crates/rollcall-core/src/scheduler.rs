//! Cancellable wall-clock timers
//!
//! Each timer is a tokio task that sleeps and then posts a [`TimerFired`]
//! message to the engine's channel. The owning state keeps the
//! [`ScheduledTask`]; dropping it aborts the task. Every fire carries the
//! generation it was scheduled with so the engine can discard stale ones.

use rollcall_util::SessionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What a timer governs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// End of the location permission activity window
    PermissionExpiry,
    /// Auto-end of an attendance session
    SessionAutoEnd(SessionId),
}

/// Message posted when a timer elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: u64,
}

/// Spawns timers that report to a single channel
pub struct Scheduler {
    tx: mpsc::UnboundedSender<TimerFired>,
    next_generation: AtomicU64,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tx,
            next_generation: AtomicU64::new(1),
        };
        (scheduler, rx)
    }

    /// Schedule `key` to fire after `delay`. Must be called within a tokio runtime.
    pub fn schedule(&self, key: TimerKey, delay: Duration) -> ScheduledTask {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx.clone();
        let fired = TimerFired {
            key: key.clone(),
            generation,
        };

        debug!(key = ?key, generation, delay_secs = delay.as_secs(), "Timer scheduled");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });

        ScheduledTask {
            key,
            generation,
            handle,
        }
    }
}

/// Handle to a pending timer; aborts the timer when dropped
#[derive(Debug)]
pub struct ScheduledTask {
    key: TimerKey,
    generation: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `fired` came from this task
    pub fn matches(&self, fired: &TimerFired) -> bool {
        self.key == fired.key && self.generation == fired.generation
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
