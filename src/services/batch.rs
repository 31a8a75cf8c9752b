use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::lock_recover;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::value::FormValue;

#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub path: String,
    pub value: FormValue,
}

impl Operation {
    pub fn new(path: impl Into<String>, value: impl Into<FormValue>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

pub type FlushHandler = Arc<dyn Fn(Vec<Operation>) + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Zero flushes on the next microtask; anything else flushes once the
    /// queue has been quiet for this long.
    pub delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchStats {
    pub total_batches: u64,
    pub total_operations: u64,
    pub average_batch_size: f64,
}

pub trait Batcher: Send + Sync {
    fn configure(&self, config: BatchConfig);
    /// Handler used by scheduled flushes and [`Batcher::flush`].
    fn set_flush_handler(&self, handler: FlushHandler);
    /// Runs `run` and flushes everything it queued through `on_flush`. Runs
    /// `run` directly when batching is off or a batch is already open.
    fn batch(&self, run: &mut dyn FnMut(), on_flush: FlushHandler);
    fn queue_operation(&self, operation: Operation);
    fn flush(&self);
    /// Cancels pending timers and drops queued operations.
    fn clear(&self);
    /// Like [`Batcher::clear`], and also resets statistics.
    fn dispose(&self);
    fn is_batching(&self) -> bool;
    fn pending_len(&self) -> usize;
    fn stats(&self) -> BatchStats;
}

#[derive(Default)]
struct BatchState {
    config: BatchConfig,
    in_progress: bool,
    queue: Vec<Operation>,
    timer: Option<TaskHandle>,
    deferred: Option<TaskHandle>,
    handler: Option<FlushHandler>,
    stats: BatchStats,
}

impl BatchState {
    fn take_scheduled(&mut self) -> Vec<TaskHandle> {
        self.timer.take().into_iter().chain(self.deferred.take()).collect()
    }
}

struct BatchShared {
    state: Mutex<BatchState>,
    scheduler: Arc<dyn Scheduler>,
}

impl BatchShared {
    fn flush_with(&self, handler: Option<FlushHandler>) {
        let (operations, handler, scheduled) = {
            let mut state = lock_recover(&self.state);
            let scheduled = state.take_scheduled();
            if state.queue.is_empty() {
                (Vec::new(), None, scheduled)
            } else {
                let operations = std::mem::take(&mut state.queue);
                let stats = &mut state.stats;
                stats.total_batches += 1;
                stats.total_operations += operations.len() as u64;
                stats.average_batch_size =
                    stats.total_operations as f64 / stats.total_batches as f64;
                let handler = handler.or_else(|| state.handler.clone());
                (operations, handler, scheduled)
            }
        };
        for handle in scheduled {
            self.scheduler.cancel(handle);
        }
        if operations.is_empty() {
            return;
        }

        debug!(operations = operations.len(), "batch flushed");
        match handler {
            Some(handler) => handler(operations),
            None => warn!(
                dropped = operations.len(),
                "batch flushed without a handler"
            ),
        }
    }

    fn clear(&self, reset_stats: bool) {
        let scheduled = {
            let mut state = lock_recover(&self.state);
            state.queue.clear();
            if reset_stats {
                state.stats = BatchStats::default();
                state.in_progress = false;
            }
            state.take_scheduled()
        };
        for handle in scheduled {
            self.scheduler.cancel(handle);
        }
    }
}

/// Releases the in-progress flag even when the batch body unwinds. Work
/// queued by a body that panicked is handed to a deferred flush.
struct InProgressGuard<'a> {
    shared: &'a Arc<BatchShared>,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        lock_recover(&self.shared.state).in_progress = false;
        if std::thread::panicking() {
            schedule_deferred(self.shared);
        }
    }
}

fn flush_task(shared: &Arc<BatchShared>) -> Box<dyn FnOnce() + Send> {
    let weak: Weak<BatchShared> = Arc::downgrade(shared);
    Box::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.flush_with(None);
        }
    })
}

fn schedule_deferred(shared: &Arc<BatchShared>) {
    let mut state = lock_recover(&shared.state);
    if state.deferred.is_none() && !state.queue.is_empty() {
        state.deferred = Some(shared.scheduler.defer(flush_task(shared)));
    }
}

#[derive(Clone)]
pub struct BatchService {
    shared: Arc<BatchShared>,
}

impl BatchService {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            shared: Arc::new(BatchShared {
                state: Mutex::new(BatchState::default()),
                scheduler,
            }),
        }
    }
}

impl Batcher for BatchService {
    fn configure(&self, config: BatchConfig) {
        lock_recover(&self.shared.state).config = config;
    }

    fn set_flush_handler(&self, handler: FlushHandler) {
        lock_recover(&self.shared.state).handler = Some(handler);
    }

    fn batch(&self, run: &mut dyn FnMut(), on_flush: FlushHandler) {
        let direct = {
            let mut state = lock_recover(&self.shared.state);
            let direct = !state.config.enabled || state.in_progress;
            if !direct {
                state.in_progress = true;
            }
            direct
        };
        if direct {
            run();
            return;
        }

        {
            let _guard = InProgressGuard {
                shared: &self.shared,
            };
            run();
        }
        self.shared.flush_with(Some(on_flush));
    }

    fn queue_operation(&self, operation: Operation) {
        let mut state = lock_recover(&self.shared.state);
        state.queue.push(operation);
        if state.in_progress {
            return;
        }

        let delay = state.config.delay;
        if delay.is_zero() {
            if state.deferred.is_none() {
                state.deferred = Some(self.shared.scheduler.defer(flush_task(&self.shared)));
            }
        } else {
            if let Some(previous) = state.timer.take() {
                self.shared.scheduler.cancel(previous);
            }
            state.timer = Some(
                self.shared
                    .scheduler
                    .delay(delay, flush_task(&self.shared)),
            );
        }
    }

    fn flush(&self) {
        self.shared.flush_with(None);
    }

    fn clear(&self) {
        self.shared.clear(false);
    }

    fn dispose(&self) {
        self.shared.clear(true);
    }

    fn is_batching(&self) -> bool {
        lock_recover(&self.shared.state).in_progress
    }

    fn pending_len(&self) -> usize {
        lock_recover(&self.shared.state).queue.len()
    }

    fn stats(&self) -> BatchStats {
        lock_recover(&self.shared.state).stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    type Flushes = Arc<Mutex<Vec<Vec<String>>>>;

    fn recording_handler() -> (Flushes, FlushHandler) {
        let flushes: Flushes = Arc::new(Mutex::new(Vec::new()));
        let handler: FlushHandler = {
            let flushes = flushes.clone();
            Arc::new(move |operations: Vec<Operation>| {
                flushes
                    .lock()
                    .expect("flush log")
                    .push(operations.into_iter().map(|op| op.path).collect());
            })
        };
        (flushes, handler)
    }

    fn service(delay_ms: u64) -> (Arc<ManualScheduler>, BatchService, Flushes) {
        let scheduler = Arc::new(ManualScheduler::new());
        let service = BatchService::new(scheduler.clone());
        service.configure(BatchConfig {
            enabled: true,
            delay: Duration::from_millis(delay_ms),
        });
        let (flushes, handler) = recording_handler();
        service.set_flush_handler(handler);
        (scheduler, service, flushes)
    }

    #[test]
    fn zero_delay_coalesces_into_one_microtask() {
        let (scheduler, service, flushes) = service(0);
        service.queue_operation(Operation::new("a", 1));
        service.queue_operation(Operation::new("b", 2));
        assert_eq!(scheduler.pending_microtasks(), 1);
        assert!(flushes.lock().expect("flush log").is_empty());

        scheduler.run_until_idle();
        assert_eq!(
            *flushes.lock().expect("flush log"),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn delayed_flush_uses_trailing_timer() {
        let (scheduler, service, flushes) = service(50);
        service.queue_operation(Operation::new("a", 1));
        scheduler.advance(Duration::from_millis(30));
        service.queue_operation(Operation::new("b", 2));
        scheduler.advance(Duration::from_millis(30));
        assert!(flushes.lock().expect("flush log").is_empty());
        assert_eq!(scheduler.pending_timers(), 1);

        scheduler.advance(Duration::from_millis(20));
        assert_eq!(flushes.lock().expect("flush log").len(), 1);
        assert_eq!(flushes.lock().expect("flush log")[0].len(), 2);
    }

    #[test]
    fn explicit_batch_flushes_once_and_cancels_timers() {
        let (scheduler, service, _) = service(50);
        let (explicit, on_flush) = recording_handler();
        let queue = service.clone();
        service.batch(
            &mut || {
                queue.queue_operation(Operation::new("x", 1));
                queue.queue_operation(Operation::new("y", 2));
                queue.queue_operation(Operation::new("z", 3));
            },
            on_flush,
        );

        assert_eq!(
            *explicit.lock().expect("flush log"),
            vec![vec!["x".to_string(), "y".to_string(), "z".to_string()]]
        );
        assert_eq!(scheduler.pending_timers(), 0);
        assert_eq!(service.stats().total_batches, 1);
        assert_eq!(service.stats().total_operations, 3);
        assert_eq!(service.stats().average_batch_size, 3.0);
    }

    #[test]
    fn nested_batch_runs_inline() {
        let (_, service, _) = service(0);
        let (explicit, on_flush) = recording_handler();
        let outer = service.clone();
        service.batch(
            &mut || {
                outer.queue_operation(Operation::new("a", 1));
                let inner = outer.clone();
                let (_, inner_flush) = recording_handler();
                outer.batch(
                    &mut || inner.queue_operation(Operation::new("b", 2)),
                    inner_flush,
                );
                assert!(outer.is_batching());
            },
            on_flush,
        );
        assert_eq!(explicit.lock().expect("flush log")[0].len(), 2);
        assert!(!service.is_batching());
    }

    #[test]
    fn disabled_batching_runs_directly() {
        let (_, service, _) = service(0);
        service.configure(BatchConfig {
            enabled: false,
            delay: Duration::ZERO,
        });
        let (explicit, on_flush) = recording_handler();
        let mut ran = false;
        service.batch(&mut || ran = true, on_flush);
        assert!(ran);
        assert!(explicit.lock().expect("flush log").is_empty());
    }

    #[test]
    fn dispose_cancels_pending_flush() {
        let (scheduler, service, flushes) = service(10);
        service.queue_operation(Operation::new("a", 1));
        service.dispose();
        assert_eq!(service.pending_len(), 0);
        assert_eq!(scheduler.pending_timers(), 0);

        scheduler.advance(Duration::from_millis(100));
        assert!(flushes.lock().expect("flush log").is_empty());
        assert_eq!(service.stats(), BatchStats::default());
    }

    #[test]
    fn panicking_batch_releases_flag() {
        let (scheduler, service, flushes) = service(0);
        let inner = service.clone();
        let (_, on_flush) = recording_handler();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inner.batch(
                &mut || {
                    inner.queue_operation(Operation::new("a", 1));
                    panic!("batch body failed");
                },
                on_flush.clone(),
            );
        }));
        assert!(result.is_err());
        assert!(!service.is_batching());

        scheduler.run_until_idle();
        assert_eq!(flushes.lock().expect("flush log").len(), 1);
    }
}
