//! Owner-scoped timers.
//!
//! Every delayed or periodic callback in the sync layer is scheduled through a
//! [`TimerArena`] owned by exactly one component (a connection, a query). When
//! the owner goes away the arena goes with it, and every timer it still holds
//! is aborted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Identifier of a timer within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
struct Slots {
    next_id: u64,
    live: HashMap<u64, AbortHandle>,
}

/// A set of timers with guaranteed release.
///
/// Timers run as tokio tasks, so scheduling requires a tokio runtime.
pub struct TimerArena {
    owner: String,
    slots: Arc<Mutex<Slots>>,
}

impl TimerArena {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Run `f` once after `delay`. The timer stops being pending when it fires.
    pub fn schedule_once<F, Fut>(&self, delay: Duration, f: F) -> TimerId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;

        let weak = Arc::downgrade(&self.slots);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if take_slot(&weak, id) {
                f().await;
            }
        });
        slots.live.insert(id, task.abort_handle());
        TimerId(id)
    }

    /// Run `f` every `period`, first one period from now, until cancelled.
    pub fn schedule_repeating<F, Fut>(&self, period: Duration, mut f: F) -> TimerId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;

        let weak = Arc::downgrade(&self.slots);
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if !slot_is_live(&weak, id) {
                    break;
                }
                f().await;
            }
        });
        slots.live.insert(id, task.abort_handle());
        TimerId(id)
    }

    /// Cancel one timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.slots.lock().live.remove(&id.0) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer and return how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self.slots.lock().live.drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        if !drained.is_empty() {
            tracing::trace!("{}: cancelled {} timer(s)", self.owner, drained.len());
        }
        drained.len()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.slots.lock().live.contains_key(&id.0)
    }

    pub fn pending(&self) -> usize {
        self.slots.lock().live.len()
    }
}

impl Drop for TimerArena {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for TimerArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerArena")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .finish()
    }
}

fn take_slot(slots: &Weak<Mutex<Slots>>, id: u64) -> bool {
    slots
        .upgrade()
        .is_some_and(|slots| slots.lock().live.remove(&id).is_some())
}

fn slot_is_live(slots: &Weak<Mutex<Slots>>, id: u64) -> bool {
    slots
        .upgrade()
        .is_some_and(|slots| slots.lock().live.contains_key(&id))
}
