//! Deferral and timer primitives.
//!
//! The engine never sleeps or spawns threads. It hands work to a [`Scheduler`]:
//! `defer` runs a task once the current call stack has unwound and before any
//! timer, `delay` runs a task after at least the given duration. Both can be
//! cancelled through the returned [`TaskHandle`].
//!
//! [`ManualScheduler`] keeps a virtual clock. Hosts with their own loop call
//! [`ManualScheduler::run_until_idle`] and [`ManualScheduler::advance`];
//! [`ManualScheduler::run_realtime`] drives the same queue against the wall
//! clock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_timer::Delay;
use tracing::trace;

use crate::error::lock_recover;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

static TASK_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn next() -> Self {
        Self(TASK_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

pub trait Scheduler: Send + Sync {
    fn defer(&self, task: Task) -> TaskHandle;
    fn delay(&self, after: Duration, task: Task) -> TaskHandle;
    /// Returns `false` when the task already ran or was never scheduled here.
    fn cancel(&self, handle: TaskHandle) -> bool;
}

#[derive(Default)]
struct QueueState {
    now: Duration,
    microtasks: VecDeque<(TaskHandle, Task)>,
    timers: BTreeMap<(Duration, TaskHandle), Task>,
    deadlines: HashMap<TaskHandle, Duration>,
}

#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<QueueState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        lock_recover(&self.state).now
    }

    pub fn pending_microtasks(&self) -> usize {
        lock_recover(&self.state).microtasks.len()
    }

    pub fn pending_timers(&self) -> usize {
        lock_recover(&self.state).timers.len()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        lock_recover(&self.state)
            .timers
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Drains the microtask queue, including tasks queued while draining.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock_recover(&self.state).microtasks.pop_front();
            let Some((_, task)) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Moves the clock forward, firing due timers in deadline order and
    /// draining microtasks before the first timer and after each one.
    pub fn advance(&self, by: Duration) -> usize {
        let mut ran = self.run_until_idle();
        let target = lock_recover(&self.state).now + by;
        loop {
            let due = {
                let mut state = lock_recover(&self.state);
                let next_key = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                next_key.and_then(|key| {
                    state.deadlines.remove(&key.1);
                    state.now = state.now.max(key.0);
                    state.timers.remove(&key)
                })
            };
            let Some(task) = due else {
                break;
            };
            task();
            ran += 1;
            ran += self.run_until_idle();
        }
        lock_recover(&self.state).now = target;
        ran + self.run_until_idle()
    }

    /// Runs every queued task, sleeping on the wall clock until each timer's
    /// deadline. Completes once no microtasks or timers remain.
    pub async fn run_realtime(&self) {
        loop {
            self.run_until_idle();
            let Some(deadline) = self.next_deadline() else {
                return;
            };
            let wait = deadline.saturating_sub(self.now());
            if !wait.is_zero() {
                Delay::new(wait).await;
            }
            self.advance(wait);
        }
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::next();
        lock_recover(&self.state).microtasks.push_back((handle, task));
        handle
    }

    fn delay(&self, after: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::next();
        let mut state = lock_recover(&self.state);
        let deadline = state.now + after;
        trace!(?handle, ?deadline, "timer scheduled");
        state.deadlines.insert(handle, deadline);
        state.timers.insert((deadline, handle), task);
        handle
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        let mut state = lock_recover(&self.state);
        if let Some(deadline) = state.deadlines.remove(&handle) {
            return state.timers.remove(&(deadline, handle)).is_some();
        }
        let before = state.microtasks.len();
        state.microtasks.retain(|(queued, _)| *queued != handle);
        state.microtasks.len() != before
    }
}
