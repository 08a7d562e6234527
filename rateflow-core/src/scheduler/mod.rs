//! Scheduling: worker pool, periodic tasks and cycle control
//!
//! The [`CycleControl`] advances the master clock and dispatches
//! [`PeriodicTask`]s at three fixed rates onto a [`Scheduler`]. Regions are
//! driven by region-bound periodic tasks: the cycle control delivers a
//! region's switch tick serially on the main-loop thread, then submits the
//! work tick as a task to the worker pool, so different regions may run in
//! parallel while each region's work stays single-threaded.

mod cycle;
mod parallel;
mod serial;
mod task;

pub use cycle::{
    AfapMainLoop, CycleControl, MainLoop, RealtimeMainLoop, TimewarpMainLoop, FAST_TICK,
    MEDIUM_TICK, MIN_TICK_LENGTH, SLOW_TICK,
};
pub use parallel::ParallelScheduler;
pub use serial::BlockingScheduler;
pub use task::PeriodicTask;

use crate::error::FlowResult;

/// An opaque unit of work accepted by a scheduler.
pub type Task = Box<dyn FnOnce() + Send>;

/// A scheduler executing opaque 0-ary tasks.
pub trait Scheduler: Send + Sync {
    /// Accepts a new task for execution.
    ///
    /// Fails with [`crate::FlowError::SchedulerStopped`] once the scheduler
    /// has been stopped.
    fn add_task(&self, task: Task) -> FlowResult<()>;

    /// Stops task execution. Idempotent.
    fn stop(&self);

    /// Number of tasks that are queued but not yet started.
    fn nr_of_waiting_tasks(&self) -> usize;
}
