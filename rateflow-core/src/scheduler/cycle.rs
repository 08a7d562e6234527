//! Cycle control: clock advance and periodic task dispatch
//!
//! The cycle control owns the master clock and the three rate buckets. One
//! call to [`CycleControl::work`] advances virtual time by a single fast
//! tick and dispatches every bucket whose tick divides the current epoch:
//! finished tasks are flagged, their switch ticks delivered serially on the
//! calling thread, and their invocations submitted to the worker pool. A
//! task still running from its previous cycle is an overrun; the timeout
//! policy decides between record-and-continue (the default) and halting the
//! controller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::task::PeriodicTask;
use super::Scheduler;
use crate::clock::{MasterClock, VirtualClock};
use crate::error::{FlowError, FlowResult};

/// Smallest scheduling granularity; the master clock advances by this much
/// per cycle.
pub const MIN_TICK_LENGTH: Duration = FAST_TICK;
/// Tick duration of the fast rate group.
pub const FAST_TICK: Duration = Duration::from_millis(10);
/// Tick duration of the medium rate group, 10 fast ticks.
pub const MEDIUM_TICK: Duration = Duration::from_millis(100);
/// Tick duration of the slow rate group, 100 fast ticks.
pub const SLOW_TICK: Duration = Duration::from_secs(1);

type WaitHook = Mutex<Option<Box<dyn Fn() + Send + Sync>>>;

fn run_hook(hook: &WaitHook) {
    if let Some(hook) = hook.lock().as_ref() {
        hook();
    }
}

/// Strategy driving the main loop of the cycle control.
///
/// Every strategy waits for the previous cycle's tasks before running the
/// body; the pacing between cycles is what distinguishes them.
pub trait MainLoop: Send + Sync {
    /// Called once when the main loop starts.
    fn arm(&self) {}

    /// Installs the wait-for-previous-cycle hook. Called by the cycle
    /// control when the strategy is adopted.
    fn set_wait_hook(&self, hook: Box<dyn Fn() + Send + Sync>);

    /// Runs one iteration of the main loop around `work`.
    fn loop_body(&self, work: &dyn Fn());
}

/// Main loop which paces cycles with the wall clock.
pub struct RealtimeMainLoop {
    wait: WaitHook,
}

impl RealtimeMainLoop {
    /// Creates the strategy.
    pub fn new() -> Self {
        Self {
            wait: Mutex::new(None),
        }
    }
}

impl Default for RealtimeMainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop for RealtimeMainLoop {
    fn set_wait_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.wait.lock() = Some(hook);
    }

    fn loop_body(&self, work: &dyn Fn()) {
        let cycle_start = Instant::now();
        run_hook(&self.wait);
        work();
        let deadline = cycle_start + MIN_TICK_LENGTH;
        if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            thread::sleep(remaining);
        }
    }
}

/// Main loop which runs as fast as possible.
pub struct AfapMainLoop {
    wait: WaitHook,
}

impl AfapMainLoop {
    /// Creates the strategy.
    pub fn new() -> Self {
        Self {
            wait: Mutex::new(None),
        }
    }
}

impl Default for AfapMainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop for AfapMainLoop {
    fn set_wait_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.wait.lock() = Some(hook);
    }

    fn loop_body(&self, work: &dyn Fn()) {
        run_hook(&self.wait);
        work();
    }
}

/// Main loop which runs at a variable multiple of realtime.
pub struct TimewarpMainLoop {
    wait: WaitHook,
    warp: Mutex<f64>,
    signal: Condvar,
}

impl TimewarpMainLoop {
    /// Creates the strategy at warp factor 1 (realtime).
    pub fn new() -> Self {
        Self {
            wait: Mutex::new(None),
            warp: Mutex::new(1.0),
            signal: Condvar::new(),
        }
    }

    /// Sets the pacing factor: cycles last `factor * MIN_TICK_LENGTH` of
    /// wall time. Takes effect immediately, also for a cycle currently
    /// being paced.
    pub fn set_warp_factor(&self, factor: f64) {
        *self.warp.lock() = factor;
        self.signal.notify_all();
    }
}

impl Default for TimewarpMainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop for TimewarpMainLoop {
    fn set_wait_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.wait.lock() = Some(hook);
    }

    fn loop_body(&self, work: &dyn Fn()) {
        let cycle_start = Instant::now();
        run_hook(&self.wait);
        work();

        let mut warp = self.warp.lock();
        loop {
            // The deadline is recomputed after every wakeup so a changed
            // warp factor applies to the cycle in flight.
            let deadline = cycle_start + MIN_TICK_LENGTH.mul_f64(*warp);
            if Instant::now() >= deadline {
                break;
            }
            self.signal.wait_until(&mut warp, deadline);
        }
    }
}

type TimeoutCallback = Box<dyn Fn(&PeriodicTask) -> bool + Send + Sync>;

struct TaskBucket {
    tick: Duration,
    tasks: Mutex<Vec<PeriodicTask>>,
}

struct CycleInner {
    /// Buckets in dispatch order: fast, medium, slow.
    buckets: [TaskBucket; 3],
    scheduler: Arc<dyn Scheduler>,
    keep_working: AtomicBool,
    running: AtomicBool,
    clock: MasterClock,
    errors: Mutex<VecDeque<FlowError>>,
    /// Custom overrun policy; `None` records an `OutOfTime` and continues.
    timeout_callback: Option<TimeoutCallback>,
}

fn is_due(now: Duration, tick: Duration) -> bool {
    now.as_nanos() % tick.as_nanos() == 0
}

impl CycleInner {
    fn record_out_of_time(&self) {
        self.errors.lock().push_back(FlowError::OutOfTime);
    }

    /// Returns true when the controller is to keep running.
    fn handle_overrun(&self, task: &PeriodicTask) -> bool {
        match self.timeout_callback.as_ref() {
            Some(callback) => callback(task),
            None => {
                tracing::warn!("cyclic task has not finished in time");
                self.record_out_of_time();
                true
            }
        }
    }

    fn work(&self) {
        let now = self.clock.virtual_clock().steady_now();
        self.clock.advance();
        for bucket in self.buckets.iter() {
            if is_due(now, bucket.tick) && !self.run_periodic_tasks(bucket) {
                return;
            }
        }
    }

    /// Dispatches every finished task in the bucket; returns false when the
    /// overrun policy demands a shutdown.
    fn run_periodic_tasks(&self, bucket: &TaskBucket) -> bool {
        let ready: Vec<PeriodicTask> = {
            let tasks = bucket.tasks.lock();
            let mut ready = Vec::with_capacity(tasks.len());
            for task in tasks.iter() {
                if task.done() {
                    ready.push(task.clone());
                } else if !self.handle_overrun(task) {
                    self.keep_working.store(false, Ordering::SeqCst);
                    return false;
                }
            }
            ready
        };

        // Switch ticks are delivered serially before any work is handed to
        // the pool, so consumers observe the generation published by the
        // producer's most recent switch.
        for task in &ready {
            task.set_work_to_do(true);
            task.send_switch_tick();
        }
        for task in &ready {
            let invocation = task.clone();
            if let Err(error) = self
                .scheduler
                .add_task(Box::new(move || invocation.invoke()))
            {
                tracing::warn!(error = %error, "could not dispatch periodic task");
            }
        }
        true
    }

    fn wait_for_current_tasks(&self) {
        let now = self.clock.virtual_clock().steady_now();
        for bucket in self.buckets.iter().rev() {
            if is_due(now, bucket.tick) {
                let tasks = bucket.tasks.lock();
                for task in tasks.iter() {
                    // Bounded wait only; overruns are detected and recorded
                    // once, at dispatch time.
                    let _ = task.wait_until_done(bucket.tick);
                }
            }
        }
    }
}

/// Controls timing and the execution of cyclic tasks on a scheduler.
pub struct CycleControl {
    inner: Arc<CycleInner>,
    main_loop: Mutex<Arc<dyn MainLoop>>,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CycleControl {
    /// Creates a cycle control with the default realtime main loop and the
    /// default overrun policy (record and continue).
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::assemble(scheduler, Arc::new(RealtimeMainLoop::new()), None)
    }

    /// Creates a cycle control with an explicit main loop strategy.
    pub fn with_main_loop(scheduler: Arc<dyn Scheduler>, main_loop: Arc<dyn MainLoop>) -> Self {
        Self::assemble(scheduler, main_loop, None)
    }

    /// Creates a cycle control with a user controlled overrun policy.
    ///
    /// The callback is triggered when a work tick takes too long; it returns
    /// true to keep the controller running and false to shut it down.
    pub fn with_timeout_callback<F>(
        scheduler: Arc<dyn Scheduler>,
        callback: F,
        main_loop: Arc<dyn MainLoop>,
    ) -> Self
    where
        F: Fn(&PeriodicTask) -> bool + Send + Sync + 'static,
    {
        Self::assemble(scheduler, main_loop, Some(Box::new(callback)))
    }

    fn assemble(
        scheduler: Arc<dyn Scheduler>,
        main_loop: Arc<dyn MainLoop>,
        timeout_callback: Option<TimeoutCallback>,
    ) -> Self {
        let inner = Arc::new(CycleInner {
            buckets: [
                TaskBucket {
                    tick: FAST_TICK,
                    tasks: Mutex::new(Vec::new()),
                },
                TaskBucket {
                    tick: MEDIUM_TICK,
                    tasks: Mutex::new(Vec::new()),
                },
                TaskBucket {
                    tick: SLOW_TICK,
                    tasks: Mutex::new(Vec::new()),
                },
            ],
            scheduler,
            keep_working: AtomicBool::new(false),
            running: AtomicBool::new(false),
            clock: MasterClock::new(MIN_TICK_LENGTH),
            errors: Mutex::new(VecDeque::new()),
            timeout_callback,
        });
        let control = Self {
            inner,
            main_loop: Mutex::new(main_loop),
            loop_thread: Mutex::new(None),
        };
        control.install_wait_hook();
        control
    }

    fn install_wait_hook(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.main_loop.lock().set_wait_hook(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.wait_for_current_tasks();
            }
        }));
    }

    /// Adds a cyclic task with the given tick rate.
    ///
    /// Tasks can only be added as long as the cycle control has not been
    /// started; rates other than fast, medium and slow are rejected.
    pub fn add_task(&self, task: PeriodicTask, tick_rate: Duration) -> FlowResult<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyRunning);
        }
        let bucket = self
            .inner
            .buckets
            .iter()
            .find(|bucket| bucket.tick == tick_rate)
            .ok_or(FlowError::InvalidRate(tick_rate))?;
        bucket.tasks.lock().push(task);
        Ok(())
    }

    /// Replaces the main loop strategy. Only legal while stopped.
    pub fn set_main_loop(&self, main_loop: Arc<dyn MainLoop>) -> FlowResult<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyRunning);
        }
        *self.main_loop.lock() = main_loop;
        self.install_wait_hook();
        Ok(())
    }

    /// Starts the main loop on its own thread.
    pub fn start(&self) -> FlowResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyRunning);
        }
        self.inner.keep_working.store(true, Ordering::SeqCst);
        let main_loop = Arc::clone(&*self.main_loop.lock());
        main_loop.arm();

        let inner = Arc::clone(&self.inner);
        let handle = thread::spawn(move || {
            let work = || inner.work();
            while inner.keep_working.load(Ordering::SeqCst) {
                main_loop.loop_body(&work);
            }
        });
        *self.loop_thread.lock() = Some(handle);
        tracing::debug!("cycle control started");
        Ok(())
    }

    /// Halts the main loop, joins it and drains all buckets.
    ///
    /// Fails with `OutOfTime` when a task does not finish within the slow
    /// tick; all threads are joined regardless.
    pub fn stop(&self) -> FlowResult<()> {
        self.inner.keep_working.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_thread.lock().take() {
            let _ = handle.join();
        }

        let mut result = Ok(());
        for bucket in self.inner.buckets.iter() {
            for task in bucket.tasks.lock().iter() {
                if !task.wait_until_done(SLOW_TICK) {
                    self.inner.record_out_of_time();
                    if result.is_ok() {
                        result = Err(FlowError::OutOfTime);
                    }
                }
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
        tracing::debug!("cycle control stopped");
        result
    }

    /// Advances the clock by a single tick and dispatches all tasks due for
    /// the cycle. Called by the main loop; may be called manually while the
    /// controller is stopped, e.g. to step simulations deterministically.
    pub fn work(&self) {
        self.inner.work();
    }

    /// True while the main loop is supposed to run.
    pub fn is_running(&self) -> bool {
        self.inner.keep_working.load(Ordering::SeqCst)
    }

    /// Most recent task error, if any. Pops the record.
    pub fn last_exception(&self) -> Option<FlowError> {
        self.inner.errors.lock().pop_back()
    }

    /// Number of tasks currently waiting in the scheduler.
    pub fn nr_of_waiting_tasks(&self) -> usize {
        self.inner.scheduler.nr_of_waiting_tasks()
    }

    /// Handle to the virtual clocks advanced by this controller.
    pub fn virtual_clock(&self) -> Arc<VirtualClock> {
        self.inner.clock.virtual_clock()
    }
}

impl Drop for CycleControl {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::super::BlockingScheduler;
    use super::*;
    use crate::region::ParallelRegion;

    fn counting_task(counter: &Arc<Mutex<usize>>) -> PeriodicTask {
        let counter = Arc::clone(counter);
        PeriodicTask::new(move || *counter.lock() += 1)
    }

    #[test]
    fn test_unknown_rate_is_rejected() {
        let control = CycleControl::new(Arc::new(BlockingScheduler::new()));
        let result = control.add_task(PeriodicTask::new(|| {}), Duration::from_millis(30));
        assert!(matches!(result, Err(FlowError::InvalidRate(_))));
    }

    #[test]
    fn test_add_task_while_running_is_rejected() {
        let control = CycleControl::with_main_loop(
            Arc::new(BlockingScheduler::new()),
            Arc::new(AfapMainLoop::new()),
        );
        control.start().unwrap();
        let result = control.add_task(PeriodicTask::new(|| {}), FAST_TICK);
        assert!(matches!(result, Err(FlowError::AlreadyRunning)));
        control.stop().unwrap();
    }

    #[test]
    fn test_double_start_is_rejected() {
        let control = CycleControl::with_main_loop(
            Arc::new(BlockingScheduler::new()),
            Arc::new(AfapMainLoop::new()),
        );
        control.start().unwrap();
        assert!(matches!(control.start(), Err(FlowError::AlreadyRunning)));
        control.stop().unwrap();
    }

    #[test]
    fn test_rate_multiples_over_one_slow_window() {
        let control = CycleControl::new(Arc::new(BlockingScheduler::new()));
        let fast = Arc::new(Mutex::new(0usize));
        let medium = Arc::new(Mutex::new(0usize));
        let slow = Arc::new(Mutex::new(0usize));

        control.add_task(counting_task(&fast), FAST_TICK).unwrap();
        control.add_task(counting_task(&medium), MEDIUM_TICK).unwrap();
        control.add_task(counting_task(&slow), SLOW_TICK).unwrap();

        for _ in 0..100 {
            control.work();
        }

        assert_eq!(*fast.lock(), 100);
        assert_eq!(*medium.lock(), 10);
        assert_eq!(*slow.lock(), 1);
    }

    #[test]
    fn test_switch_tick_precedes_work_tick() {
        let control = CycleControl::new(Arc::new(BlockingScheduler::new()));
        let region = Arc::new(ParallelRegion::new("phase", FAST_TICK));
        let phases = Arc::new(Mutex::new(Vec::new()));

        let on_switch = Arc::clone(&phases);
        region.switch_tick().connect(move |()| on_switch.lock().push('s'));
        let on_work = Arc::clone(&phases);
        region.work_tick().connect(move |()| on_work.lock().push('w'));

        control
            .add_task(PeriodicTask::for_region(&region), FAST_TICK)
            .unwrap();
        control.work();

        assert_eq!(*phases.lock(), vec!['s', 'w']);
    }

    #[test]
    fn test_no_exception_without_overrun() {
        let control = CycleControl::new(Arc::new(BlockingScheduler::new()));
        control.add_task(PeriodicTask::new(|| {}), FAST_TICK).unwrap();
        for _ in 0..10 {
            control.work();
        }
        assert!(control.last_exception().is_none());
    }

    #[test]
    fn test_restart_after_stop() {
        let control = CycleControl::with_main_loop(
            Arc::new(BlockingScheduler::new()),
            Arc::new(AfapMainLoop::new()),
        );
        control.start().unwrap();
        control.stop().unwrap();
        control.start().unwrap();
        control.stop().unwrap();
    }
}
