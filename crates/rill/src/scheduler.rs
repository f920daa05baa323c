//! Timer surface consumed by combinators (`throttle`, `debounce`, sampling).
//!
//! The propagation engine itself never waits on a timer; completing a
//! reactive is its cancellation primitive. Combinators schedule one-shot and
//! periodic thunks here and cancel superseded ones via the returned task
//! handles.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A scheduled thunk. Periodic tasks keep their thunk across fires.
pub type TaskThunk = Box<dyn FnMut() + Send>;

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct TimerTask {
    state: Arc<TaskState>,
}

struct TaskState {
    cancelled: AtomicBool,
    pending: AtomicBool,
}

impl TimerTask {
    fn new() -> Self {
        Self {
            state: Arc::new(TaskState {
                cancelled: AtomicBool::new(false),
                pending: AtomicBool::new(true),
            }),
        }
    }

    /// Prevent any further fire. Already-running thunks are not interrupted.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.pending.store(false, Ordering::SeqCst);
    }

    /// A fire is still scheduled.
    pub fn pending(&self) -> bool {
        self.state.pending.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    fn settle(&self) {
        self.state.pending.store(false, Ordering::SeqCst);
    }
}

/// Abstract timer surface: one-shot and periodic tasks with cancellation.
pub trait Scheduler: Send + Sync {
    /// Run `thunk` once after `delay_ms`.
    fn once(&self, delay_ms: u64, thunk: TaskThunk) -> TimerTask;

    /// Run `thunk` every `period_ms`, first fire after `initial_ms`.
    fn interval_after(&self, initial_ms: u64, period_ms: u64, thunk: TaskThunk) -> TimerTask;

    /// Run `thunk` every `period_ms`, first fire after one period.
    fn interval(&self, period_ms: u64, thunk: TaskThunk) -> TimerTask {
        self.interval_after(period_ms, period_ms, thunk)
    }

    /// Cancel every scheduled task.
    fn cancel_all(&self);
}

struct TimerEntry {
    fire_at: Instant,
    period: Option<Duration>,
    thunk: TaskThunk,
    task: TimerTask,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Min-heap: earlier deadlines first.
        other.fire_at.cmp(&self.fire_at)
    }
}

struct SchedulerInner {
    queue: Mutex<BinaryHeap<TimerEntry>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

/// Wall-clock scheduler backed by a dedicated timer thread and a min-heap of
/// deadlines. A panicking thunk is logged and its task treated as cancelled.
pub struct ThreadScheduler {
    inner: Arc<SchedulerInner>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_inner = inner.clone();
        let handle = thread::Builder::new()
            .name("rill-scheduler".into())
            .spawn(move || timer_loop(worker_inner))
            .expect("failed to spawn scheduler thread");
        Self {
            inner,
            handle: Some(handle),
        }
    }

    fn schedule(&self, initial: Duration, period: Option<Duration>, thunk: TaskThunk) -> TimerTask {
        let task = TimerTask::new();
        let entry = TimerEntry {
            fire_at: Instant::now() + initial,
            period,
            thunk,
            task: task.clone(),
        };
        self.inner.queue.lock().push(entry);
        self.wake();
        task
    }

    fn wake(&self) {
        self.inner.wakeup.notify_all();
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn once(&self, delay_ms: u64, thunk: TaskThunk) -> TimerTask {
        self.schedule(Duration::from_millis(delay_ms), None, thunk)
    }

    fn interval_after(&self, initial_ms: u64, period_ms: u64, thunk: TaskThunk) -> TimerTask {
        self.schedule(
            Duration::from_millis(initial_ms),
            Some(Duration::from_millis(period_ms)),
            thunk,
        )
    }

    fn cancel_all(&self) {
        let mut queue = self.inner.queue.lock();
        for entry in queue.drain() {
            entry.task.cancel();
        }
        drop(queue);
        self.wake();
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn timer_loop(inner: Arc<SchedulerInner>) {
    let mut queue = inner.queue.lock();
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        let next_deadline = queue.peek().map(|entry| entry.fire_at);
        match next_deadline {
            None => {
                inner.wakeup.wait(&mut queue);
            }
            Some(deadline) if deadline > now => {
                inner.wakeup.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                let mut entry = queue.pop().expect("peeked entry");
                if entry.task.cancelled() {
                    continue;
                }
                // Run without the lock so the thunk can schedule more tasks.
                drop(queue);
                let panicked =
                    catch_unwind(AssertUnwindSafe(|| (entry.thunk)())).is_err();
                queue = inner.queue.lock();

                if panicked {
                    tracing::error!("scheduled task panicked; cancelling it");
                    entry.task.cancel();
                } else if let Some(period) = entry.period {
                    if !entry.task.cancelled() {
                        entry.fire_at += period;
                        queue.push(entry);
                        continue;
                    }
                }
                entry.task.settle();
            }
        }
    }
}

struct VirtualEntry {
    fire_at_ms: u64,
    period_ms: Option<u64>,
    thunk: TaskThunk,
    task: TimerTask,
}

impl PartialEq for VirtualEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms
    }
}

impl Eq for VirtualEntry {}

impl PartialOrd for VirtualEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for VirtualEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Min-heap: smaller fire times first.
        other.fire_at_ms.cmp(&self.fire_at_ms)
    }
}

struct VirtualState {
    now_ms: u64,
    entries: BinaryHeap<VirtualEntry>,
}

/// Virtual-time scheduler for deterministic tests.
///
/// Time only advances when `advance_by` is called; due thunks run on the
/// calling thread, and periodic tasks re-schedule immediately so cascading
/// fires land within a single advance.
pub struct VirtualScheduler {
    state: Mutex<VirtualState>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VirtualState {
                now_ms: 0,
                entries: BinaryHeap::new(),
            }),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.state.lock().now_ms
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().entries.is_empty()
    }

    /// Time until the next fire, if any.
    pub fn time_to_next(&self) -> Option<u64> {
        let state = self.state.lock();
        state
            .entries
            .peek()
            .map(|entry| entry.fire_at_ms.saturating_sub(state.now_ms))
    }

    /// Advance virtual time, firing every task that falls due. Thunks run
    /// outside the lock, so they may schedule further tasks; repeating tasks
    /// re-schedule against the same target, so one advance can fire them
    /// several times.
    pub fn advance_by(&self, ms: u64) {
        let target = {
            let mut state = self.state.lock();
            state.now_ms += ms;
            state.now_ms
        };

        loop {
            let due = {
                let mut state = self.state.lock();
                match state.entries.peek() {
                    Some(entry) if entry.fire_at_ms <= target => {
                        Some(state.entries.pop().expect("peeked entry"))
                    }
                    _ => None,
                }
            };
            let Some(mut entry) = due else { break };
            if entry.task.cancelled() {
                continue;
            }
            let panicked = catch_unwind(AssertUnwindSafe(|| (entry.thunk)())).is_err();
            if panicked {
                tracing::error!("scheduled task panicked; cancelling it");
                entry.task.cancel();
                continue;
            }
            match entry.period_ms {
                Some(period) if !entry.task.cancelled() => {
                    entry.fire_at_ms += period;
                    self.state.lock().entries.push(entry);
                }
                _ => entry.task.settle(),
            }
        }
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for VirtualScheduler {
    fn once(&self, delay_ms: u64, thunk: TaskThunk) -> TimerTask {
        let task = TimerTask::new();
        let mut state = self.state.lock();
        let fire_at_ms = state.now_ms + delay_ms;
        state.entries.push(VirtualEntry {
            fire_at_ms,
            period_ms: None,
            thunk,
            task: task.clone(),
        });
        task
    }

    fn interval_after(&self, initial_ms: u64, period_ms: u64, thunk: TaskThunk) -> TimerTask {
        let task = TimerTask::new();
        let mut state = self.state.lock();
        let fire_at_ms = state.now_ms + initial_ms;
        state.entries.push(VirtualEntry {
            fire_at_ms,
            period_ms: Some(period_ms),
            thunk,
            task: task.clone(),
        });
        task
    }

    fn cancel_all(&self) {
        let mut state = self.state.lock();
        for entry in state.entries.drain() {
            entry.task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn counter_thunk(counter: &Arc<AtomicUsize>) -> TaskThunk {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn virtual_clock_starts_at_zero() {
        let scheduler = VirtualScheduler::new();
        assert_eq!(scheduler.now_ms(), 0);
        assert!(scheduler.time_to_next().is_none());
    }

    #[test]
    fn virtual_once_fires_at_deadline() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let task = scheduler.once(1000, counter_thunk(&fired));
        assert!(scheduler.has_pending());

        scheduler.advance_by(500);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(task.pending());

        scheduler.advance_by(500);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!task.pending());
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn virtual_interval_fires_multiple_times_in_one_advance() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.interval(100, counter_thunk(&fired));

        // Fires at 100, 200, 300.
        scheduler.advance_by(350);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn virtual_interval_after_uses_initial_delay() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.interval_after(10, 100, counter_thunk(&fired));

        scheduler.advance_by(10);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        scheduler.advance_by(100);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_prevents_fire() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let task = scheduler.once(100, counter_thunk(&fired));

        task.cancel();
        scheduler.advance_by(200);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!task.pending());
    }

    #[test]
    fn cancel_all_clears_everything() {
        let scheduler = VirtualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let a = scheduler.once(100, counter_thunk(&fired));
        let b = scheduler.interval(50, counter_thunk(&fired));

        scheduler.cancel_all();
        scheduler.advance_by(500);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(a.cancelled());
        assert!(b.cancelled());
    }

    #[test]
    fn time_to_next_counts_down() {
        let scheduler = VirtualScheduler::new();
        scheduler.once(1000, Box::new(|| {}));
        assert_eq!(scheduler.time_to_next(), Some(1000));

        scheduler.advance_by(300);
        assert_eq!(scheduler.time_to_next(), Some(700));
    }

    #[test]
    fn thread_scheduler_once_fires() {
        let scheduler = ThreadScheduler::new();
        let (tx, rx) = mpsc::channel();
        scheduler.once(
            20,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn thread_scheduler_cancel_wins_a_long_delay() {
        let scheduler = ThreadScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let task = scheduler.once(60_000, counter_thunk(&fired));
        assert!(task.pending());
        task.cancel();
        assert!(!task.pending());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
