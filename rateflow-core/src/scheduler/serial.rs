//! Blocking scheduler

use parking_lot::Mutex;

use super::{Scheduler, Task};
use crate::error::{FlowError, FlowResult};

/// A scheduler that blocks and executes a task as soon as it is added.
///
/// Useful for tests and single-threaded embeddings where task execution
/// must be deterministic.
pub struct BlockingScheduler {
    stopped: Mutex<bool>,
}

impl BlockingScheduler {
    /// Creates the scheduler.
    pub fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
        }
    }
}

impl Scheduler for BlockingScheduler {
    fn add_task(&self, task: Task) -> FlowResult<()> {
        let stopped = self.stopped.lock();
        if *stopped {
            return Err(FlowError::SchedulerStopped);
        }
        task();
        Ok(())
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
    }

    fn nr_of_waiting_tasks(&self) -> usize {
        // A task is "waiting" exactly while add_task executes it.
        if self.stopped.try_lock().is_none() {
            1
        } else {
            0
        }
    }
}

impl Default for BlockingScheduler {
    fn default() -> Self {
        Self::new()
    }
}
