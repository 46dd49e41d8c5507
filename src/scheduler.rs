//! Task scheduling across the two execution contexts.
//!
//! * **Sync** – one logical lane; tasks run strictly one after another. All
//!   placement, teleport and metadata pushes that follow a spawn go here.
//! * **Worker** – tasks may run in parallel. Periodic visibility passes and
//!   broadcasts go here.
//!
//! Times are expressed in ticks. [`TokioScheduler`] maps a tick onto a fixed
//! wall-clock duration; [`ManualScheduler`] only advances when told to.

use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type Task = Box<dyn FnOnce() + Send + 'static>;
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    Sync,
    Worker,
}

// ---------------------------------------------------------------------------
// Task handle
// ---------------------------------------------------------------------------

/// Cancellation handle for a scheduled task. Cancelling twice is harmless.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Scheduler trait
// ---------------------------------------------------------------------------

pub trait Scheduler: Send + Sync {
    /// Run `task` as soon as the context allows.
    fn run(&self, ctx: ExecContext, task: Task) -> TaskHandle;

    /// Run `task` once after `delay_ticks`.
    fn run_later(&self, ctx: ExecContext, delay_ticks: u64, task: Task) -> TaskHandle;

    /// Run `task` after `delay_ticks`, then every `period_ticks` until
    /// cancelled. A period of zero is treated as one tick.
    fn run_timer(
        &self,
        ctx: ExecContext,
        delay_ticks: u64,
        period_ticks: u64,
        task: RepeatingTask,
    ) -> TaskHandle;
}

// ---------------------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------------------

/// Scheduler backed by a Tokio runtime.
///
/// The sync lane is a single task draining an unbounded channel, so jobs
/// submitted to it execute in submission order and never overlap.
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
    tick: Duration,
    sync_lane: mpsc::UnboundedSender<(TaskHandle, Task)>,
}

impl TokioScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn start(tick: Duration) -> Arc<Self> {
        Self::start_on(tokio::runtime::Handle::current(), tick)
    }

    pub fn start_on(runtime: tokio::runtime::Handle, tick: Duration) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(TaskHandle, Task)>();
        runtime.spawn(async move {
            while let Some((handle, task)) = rx.recv().await {
                if handle.is_cancelled() {
                    continue;
                }
                // A panicking job must not take the lane down with it.
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                    warn!("Sync task panicked; lane continues");
                }
            }
        });
        Arc::new(Self {
            runtime,
            tick,
            sync_lane: tx,
        })
    }

    fn dispatch(&self, ctx: ExecContext, handle: TaskHandle, task: Task) {
        dispatch_on(&self.runtime, &self.sync_lane, ctx, handle, task);
    }

    fn ticks(&self, n: u64) -> Duration {
        self.tick.saturating_mul(n.min(u32::MAX as u64) as u32)
    }
}

fn dispatch_on(
    runtime: &tokio::runtime::Handle,
    sync_lane: &mpsc::UnboundedSender<(TaskHandle, Task)>,
    ctx: ExecContext,
    handle: TaskHandle,
    task: Task,
) {
    match ctx {
        ExecContext::Sync => {
            if sync_lane.send((handle, task)).is_err() {
                warn!("Sync lane closed; task dropped");
            }
        }
        ExecContext::Worker => {
            runtime.spawn_blocking(move || {
                if !handle.is_cancelled() {
                    task();
                }
            });
        }
    }
}

impl Scheduler for TokioScheduler {
    fn run(&self, ctx: ExecContext, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        self.dispatch(ctx, handle.clone(), task);
        handle
    }

    fn run_later(&self, ctx: ExecContext, delay_ticks: u64, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let delay = self.ticks(delay_ticks);
        let runtime = self.runtime.clone();
        let lane = self.sync_lane.clone();
        let h = handle.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !h.is_cancelled() {
                dispatch_on(&runtime, &lane, ctx, h, task);
            }
        });
        handle
    }

    fn run_timer(
        &self,
        ctx: ExecContext,
        delay_ticks: u64,
        period_ticks: u64,
        task: RepeatingTask,
    ) -> TaskHandle {
        let handle = TaskHandle::new();
        let delay = self.ticks(delay_ticks);
        let period = self.ticks(period_ticks.max(1));
        let runtime = self.runtime.clone();
        let lane = self.sync_lane.clone();
        let h = handle.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let busy = Arc::new(AtomicBool::new(false));
            loop {
                timer.tick().await;
                if h.is_cancelled() {
                    break;
                }
                // Runs of one timer never overlap; a tick that finds the
                // previous run unfinished is skipped.
                if busy.swap(true, Ordering::SeqCst) {
                    debug!("Timer tick skipped; previous run still busy");
                    continue;
                }
                let guard = BusyGuard(busy.clone());
                let job = task.clone();
                dispatch_on(
                    &runtime,
                    &lane,
                    ctx,
                    h.clone(),
                    Box::new(move || {
                        let _guard = guard;
                        job();
                    }),
                );
            }
        });
        handle
    }
}

/// Clears a timer's busy flag when its job finishes, panics, or is dropped
/// unrun.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Manual
// ---------------------------------------------------------------------------

enum Job {
    Once(Task),
    Repeating { task: RepeatingTask, period: u64 },
}

struct Scheduled {
    due: u64,
    seq: u64,
    ctx: ExecContext,
    handle: TaskHandle,
    job: Job,
}

#[derive(Default)]
struct ManualState {
    now: u64,
    next_seq: u64,
    queue: Vec<Scheduled>,
}

/// Deterministic scheduler: nothing runs until [`run_pending`] or
/// [`advance`] is called, and then everything runs inline on the caller's
/// thread in (due tick, submission order).
///
/// [`run_pending`]: ManualScheduler::run_pending
/// [`advance`]: ManualScheduler::advance
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Number of queued, non-cancelled jobs.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .iter()
            .filter(|s| !s.handle.is_cancelled())
            .count()
    }

    fn push(&self, ctx: ExecContext, delay: u64, job: Job) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.queue.push(Scheduled {
            due,
            seq,
            ctx,
            handle: handle.clone(),
            job,
        });
        handle
    }

    /// Run everything due at the current tick, including jobs that those
    /// jobs enqueue for "now". Returns how many jobs ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                state.queue.retain(|s| !s.handle.is_cancelled());
                let now = state.now;
                let idx = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.due <= now)
                    .min_by_key(|(_, s)| (s.due, s.seq))
                    .map(|(i, _)| i);
                idx.map(|i| state.queue.swap_remove(i))
            };
            let Some(scheduled) = next else {
                return ran;
            };
            ran += 1;
            let Scheduled {
                ctx, handle, job, ..
            } = scheduled;
            match job {
                Job::Once(task) => task(),
                Job::Repeating { task, period } => {
                    task();
                    if !handle.is_cancelled() {
                        let mut state = self.state.lock();
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        let due = state.now + period;
                        state.queue.push(Scheduled {
                            due,
                            seq,
                            ctx,
                            handle,
                            job: Job::Repeating { task, period },
                        });
                    }
                }
            }
        }
    }

    /// Step the clock one tick at a time, running due jobs at each step.
    pub fn advance(&self, ticks: u64) -> usize {
        let mut ran = self.run_pending();
        for _ in 0..ticks {
            self.state.lock().now += 1;
            ran += self.run_pending();
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn run(&self, ctx: ExecContext, task: Task) -> TaskHandle {
        self.push(ctx, 0, Job::Once(task))
    }

    fn run_later(&self, ctx: ExecContext, delay_ticks: u64, task: Task) -> TaskHandle {
        self.push(ctx, delay_ticks, Job::Once(task))
    }

    fn run_timer(
        &self,
        ctx: ExecContext,
        delay_ticks: u64,
        period_ticks: u64,
        task: RepeatingTask,
    ) -> TaskHandle {
        self.push(
            ctx,
            delay_ticks,
            Job::Repeating {
                task,
                period: period_ticks.max(1),
            },
        )
    }
}
