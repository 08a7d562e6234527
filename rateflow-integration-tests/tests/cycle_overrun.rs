//! Overrun detection against a running cycle control

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rateflow_integration_tests::init_tracing;
use rateflow_core::{
    CycleControl, FlowError, ParallelScheduler, PeriodicTask, FAST_TICK,
};
use serial_test::serial;

#[test]
#[serial]
fn test_overrunning_fast_task_records_out_of_time_and_keeps_running() {
    init_tracing();

    let control = CycleControl::new(Arc::new(ParallelScheduler::new()));
    // A fast task that takes ten times its tick.
    control
        .add_task(
            PeriodicTask::new(|| thread::sleep(Duration::from_millis(100))),
            FAST_TICK,
        )
        .unwrap();

    control.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut overrun = None;
    while overrun.is_none() && Instant::now() < deadline {
        overrun = control.last_exception();
        thread::sleep(Duration::from_millis(5));
    }

    // Default policy: the overrun is recorded and the controller keeps going.
    assert!(matches!(overrun, Some(FlowError::OutOfTime)));
    assert!(control.is_running());

    // The task finishes well within the slow tick, so stopping drains
    // cleanly and joins all threads.
    control.stop().unwrap();
    assert!(!control.is_running());
}

#[test]
#[serial]
fn test_completing_tasks_never_record_out_of_time() {
    init_tracing();

    let control = CycleControl::new(Arc::new(ParallelScheduler::new()));
    control
        .add_task(PeriodicTask::new(|| {}), FAST_TICK)
        .unwrap();

    control.start().unwrap();
    thread::sleep(Duration::from_millis(100));
    control.stop().unwrap();

    assert!(control.last_exception().is_none());
}
