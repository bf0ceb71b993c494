//! Hashed Time Wheel
//!
//! Schedules named one-shot tasks at absolute times. The engine uses it for
//! TTL expiration: every `EXPIRE` schedules a deletion task, every `PERSIST`
//! or key removal cancels it.
//!
//! The wheel is a ring of slots advanced by a background Tokio task at a
//! fixed tick. A task scheduled `d` ticks out lands in slot
//! `(position + d) % slots` with `d / slots` remaining rotations, so far-out
//! deadlines cost nothing until their slot comes around. Tasks fire at or
//! shortly after their deadline; ordering between tasks in the same slot is
//! unspecified. Missed ticks (a paused or starved dispatcher) are burst
//! through on resume.
//!
//! Scheduling the same task key again replaces the pending task. A task
//! that has already been dispatched cannot be cancelled; callbacks are
//! expected to re-validate their reason for firing under the locks they
//! acquire, which closes the race against a TTL updated while the callback
//! waited.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Work dispatched when a task's deadline is reached.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    rotations: usize,
    job: Job,
}

struct WheelState {
    /// One bucket of keyed tasks per tick position.
    slots: Vec<HashMap<Bytes, Task>>,
    /// Slot the next tick will fire.
    position: usize,
    /// Task key -> slot currently holding it, for replace and cancel.
    locations: HashMap<Bytes, usize>,
}

struct WheelInner {
    tick: Duration,
    state: Mutex<WheelState>,
}

/// Handle to a running time wheel. Dropping it stops the dispatcher.
pub struct TimeWheel {
    inner: Arc<WheelInner>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for TimeWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("TimeWheel")
            .field("tick", &self.inner.tick)
            .field("slots", &state.slots.len())
            .field("pending", &state.locations.len())
            .finish()
    }
}

impl TimeWheel {
    /// Starts a wheel with the given tick interval and slot count and spawns
    /// its dispatcher task.
    pub fn start(tick: Duration, slot_count: usize) -> Self {
        let inner = Arc::new(WheelInner {
            tick,
            state: Mutex::new(WheelState {
                slots: (0..slot_count.max(2)).map(|_| HashMap::new()).collect(),
                position: 0,
                locations: HashMap::new(),
            }),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(dispatcher_loop(Arc::clone(&inner), shutdown_rx));
        Self { inner, shutdown_tx }
    }

    /// Schedules `job` to run at or shortly after `when`, keyed by
    /// `task_key`. An existing task under the same key is replaced.
    pub fn at(&self, when: SystemTime, task_key: impl Into<Bytes>, job: Job) {
        let task_key = task_key.into();
        let delay = when
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        // round up a full tick so a task never fires before its deadline
        let ticks = (delay.as_millis() / self.inner.tick.as_millis().max(1)) as usize + 1;

        let mut state = self.inner.state.lock().unwrap();
        if let Some(old_slot) = state.locations.remove(&task_key) {
            state.slots[old_slot].remove(&task_key);
        }
        let slot_count = state.slots.len();
        let slot = (state.position + ticks) % slot_count;
        let rotations = ticks / slot_count;
        state.locations.insert(task_key.clone(), slot);
        state.slots[slot].insert(task_key, Task { rotations, job });
    }

    /// Removes a pending task. Does nothing for unknown keys or tasks that
    /// have already been dispatched.
    pub fn cancel(&self, task_key: &[u8]) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(slot) = state.locations.remove(task_key) {
            state.slots[slot].remove(task_key);
        }
    }

    /// Number of tasks still waiting to fire.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().unwrap().locations.len()
    }

    /// Stops the dispatcher. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TimeWheel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn dispatcher_loop(inner: Arc<WheelInner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.tick);
    // catch up on ticks missed while paused instead of silently skipping
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("time wheel dispatcher stopping");
                    return;
                }
            }
        }

        let due = advance(&inner);
        // run outside the state lock: jobs take engine locks of their own
        for job in due {
            job();
        }
    }
}

/// Advances the wheel one position and drains the tasks due in it.
fn advance(inner: &WheelInner) -> Vec<Job> {
    let mut state = inner.state.lock().unwrap();
    let position = (state.position + 1) % state.slots.len();
    state.position = position;

    let mut due = Vec::new();
    let mut keep = HashMap::new();
    let drained: Vec<_> = state.slots[position].drain().collect();
    for (key, mut task) in drained {
        if task.rotations == 0 {
            state.locations.remove(&key);
            due.push(task.job);
        } else {
            task.rotations -= 1;
            keep.insert(key, task);
        }
    }
    state.slots[position] = keep;
    due
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn soon(ms: u64) -> SystemTime {
        SystemTime::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn fires_at_deadline() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 32);
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        wheel.at(
            soon(50),
            "t1",
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "fired early");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.pending(), 0);
    }

    #[tokio::test]
    async fn fires_tasks_beyond_one_rotation() {
        // 4 slots * 10ms per rotation; 120ms needs several rotations
        let wheel = TimeWheel::start(Duration::from_millis(10), 4);
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        wheel.at(
            soon(120),
            "far",
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 32);
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        wheel.at(
            soon(60),
            "t",
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        wheel.cancel(b"t");
        wheel.cancel(b"t");
        wheel.cancel(b"never-existed");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_pending_task() {
        let wheel = TimeWheel::start(Duration::from_millis(10), 32);
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        wheel.at(
            soon(40),
            "k",
            Box::new(move || {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        // replacement pushes the deadline out and drops the first job
        let c2 = Arc::clone(&counter);
        wheel.at(
            soon(120),
            "k",
            Box::new(move || {
                c2.fetch_add(100, Ordering::SeqCst);
            }),
        );
        assert_eq!(wheel.pending(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn stops_on_drop() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let wheel = TimeWheel::start(Duration::from_millis(10), 32);
            let flag = Arc::clone(&fired);
            wheel.at(
                soon(100),
                "t",
                Box::new(move || {
                    flag.fetch_add(1, Ordering::SeqCst);
                }),
            );
            // wheel dropped here
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
