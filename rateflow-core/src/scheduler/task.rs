//! Periodic tasks

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::region::ParallelRegion;

struct TaskState {
    /// True while work for the current cycle has not been executed yet.
    work_to_do: bool,
    /// Start time of the most recent work cycle.
    work_start: Instant,
}

struct TaskInner {
    state: Mutex<TaskState>,
    done: Condvar,
    work: Mutex<Box<dyn FnMut() + Send>>,
    region: Option<Arc<ParallelRegion>>,
}

/// A task executed with a fixed rate by the cycle control.
///
/// Cheap to clone; all clones share the same completion state. A task bound
/// to a region drives that region: invoking it fires the region's work tick,
/// and `send_switch_tick` advances the region's buffers.
#[derive(Clone)]
pub struct PeriodicTask {
    inner: Arc<TaskInner>,
}

impl PeriodicTask {
    /// Creates a task executing `job` every cycle.
    pub fn new<F>(job: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                state: Mutex::new(TaskState {
                    work_to_do: false,
                    work_start: Instant::now(),
                }),
                done: Condvar::new(),
                work: Mutex::new(Box::new(job)),
                region: None,
            }),
        }
    }

    /// Creates a task that executes the work tick of `region` every cycle.
    pub fn for_region(region: &Arc<ParallelRegion>) -> Self {
        let work_region = Arc::clone(region);
        Self {
            inner: Arc::new(TaskInner {
                state: Mutex::new(TaskState {
                    work_to_do: false,
                    work_start: Instant::now(),
                }),
                done: Condvar::new(),
                work: Mutex::new(Box::new(move || work_region.ticks().work())),
                region: Some(Arc::clone(region)),
            }),
        }
    }

    /// True when the work of the current cycle has been executed.
    pub fn done(&self) -> bool {
        !self.inner.state.lock().work_to_do
    }

    /// Sets the work flag; waiters are notified on the transition to done.
    pub fn set_work_to_do(&self, todo: bool) {
        {
            let mut state = self.inner.state.lock();
            state.work_to_do = todo;
        }
        if !todo {
            self.inner.done.notify_all();
        }
    }

    /// Waits for this task to be done, but only until `timeout` after the
    /// start of the current cycle.
    ///
    /// Returns true if the task is done.
    pub fn wait_until_done(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        loop {
            if !state.work_to_do {
                return true;
            }
            let deadline = state.work_start + timeout;
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                return !state.work_to_do;
            }
        }
    }

    /// Fires the switch tick of the bound region, if any.
    pub fn send_switch_tick(&self) {
        if let Some(region) = self.inner.region.as_ref() {
            region.ticks().switch_buffers();
        }
    }

    /// Runs the work for one cycle and clears the work flag.
    pub fn invoke(&self) {
        self.inner.state.lock().work_start = Instant::now();
        {
            let mut work = self.inner.work.lock();
            (*work)();
        }
        self.set_work_to_do(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_task_starts_done() {
        let task = PeriodicTask::new(|| {});
        assert!(task.done());
    }

    #[test]
    fn test_invoke_clears_work_flag() {
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let task = PeriodicTask::new(move || *flag.lock() = true);

        task.set_work_to_do(true);
        assert!(!task.done());

        task.invoke();

        assert!(task.done());
        assert!(*ran.lock());
    }

    #[test]
    fn test_wait_until_done_times_out_on_pending_work() {
        let task = PeriodicTask::new(|| {});
        task.set_work_to_do(true);
        assert!(!task.wait_until_done(Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_until_done_wakes_on_completion() {
        let task = PeriodicTask::new(|| {});
        task.set_work_to_do(true);

        let waiter = task.clone();
        let handle = thread::spawn(move || waiter.wait_until_done(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        task.invoke();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_region_task_drives_work_and_switch_ticks() {
        let region = Arc::new(ParallelRegion::new("drive", Duration::from_millis(10)));
        let counts = Arc::new(Mutex::new((0usize, 0usize)));

        let on_switch = Arc::clone(&counts);
        region.switch_tick().connect(move |()| on_switch.lock().0 += 1);
        let on_work = Arc::clone(&counts);
        region.work_tick().connect(move |()| on_work.lock().1 += 1);

        let task = PeriodicTask::for_region(&region);
        task.send_switch_tick();
        task.invoke();

        assert_eq!(*counts.lock(), (1, 1));
    }
}
