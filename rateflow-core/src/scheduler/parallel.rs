//! Thread-pool scheduler

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::{Scheduler, Task};
use crate::error::{FlowError, FlowResult};

struct Queue {
    tasks: VecDeque<Task>,
    /// Flag indicating that workers keep working.
    do_work: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Notifies worker threads when new tasks are available.
    available: Condvar,
}

/// Simple scheduler based on a thread pool.
///
/// Tasks enter a FIFO queue and are picked up by a pool of worker threads,
/// one worker per available CPU (at least one). `add_task` wakes a single
/// idle worker.
pub struct ParallelScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ParallelScheduler {
    /// Number of worker threads used by a new scheduler.
    pub fn num_threads() -> usize {
        num_cpus::get().max(1)
    }

    /// Creates the scheduler and starts its worker threads.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                do_work: true,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(Self::num_threads());
        for _ in 0..Self::num_threads() {
            let shared = Arc::clone(&shared);
            workers.push(thread::spawn(move || loop {
                let task = {
                    let mut queue = shared.queue.lock();
                    loop {
                        if !queue.do_work {
                            return;
                        }
                        if let Some(task) = queue.tasks.pop_front() {
                            break task;
                        }
                        shared.available.wait(&mut queue);
                    }
                };
                task();
            }));
        }

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }
}

impl Scheduler for ParallelScheduler {
    fn add_task(&self, task: Task) -> FlowResult<()> {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.do_work {
                return Err(FlowError::SchedulerStopped);
            }
            queue.tasks.push_back(task);
        }
        self.shared.available.notify_one();
        Ok(())
    }

    fn stop(&self) {
        {
            // Take the lock first so no work loop can re-enter the wait
            // while the flag is being set.
            let mut queue = self.shared.queue.lock();
            queue.do_work = false;
        }
        self.shared.available.notify_all();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }

    fn nr_of_waiting_tasks(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }
}

impl Default for ParallelScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ParallelScheduler {
    fn drop(&mut self) {
        // Destroying running threads is illegal, stop them first.
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_tasks_are_executed() {
        let scheduler = ParallelScheduler::new();
        let (sender, receiver) = mpsc::channel();

        for value in 0..4 {
            let sender = sender.clone();
            scheduler
                .add_task(Box::new(move || {
                    let _ = sender.send(value);
                }))
                .unwrap();
        }

        let mut received: Vec<i32> = (0..4)
            .map(|_| receiver.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        received.sort_unstable();
        assert_eq!(received, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_add_task_after_stop_is_rejected() {
        let scheduler = ParallelScheduler::new();
        scheduler.stop();
        let result = scheduler.add_task(Box::new(|| {}));
        assert!(matches!(result, Err(FlowError::SchedulerStopped)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let scheduler = ParallelScheduler::new();
        scheduler.stop();
        scheduler.stop();
    }

    #[test]
    fn test_pool_has_at_least_one_worker() {
        assert!(ParallelScheduler::num_threads() >= 1);
    }
}
