//! End-to-end: node graph driven by the running scheduler

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rateflow_core::{Infrastructure, NodeBase, RegionWorkerNode, FAST_TICK, MEDIUM_TICK};
use rateflow_integration_tests::init_tracing;
use serial_test::serial;

#[test]
#[serial]
fn test_cross_rate_events_flow_while_scheduler_runs() {
    init_tracing();

    let infrastructure = Infrastructure::new();
    let fast = infrastructure.add_region("fast", FAST_TICK).unwrap();
    let medium = infrastructure.add_region("medium", MEDIUM_TICK).unwrap();

    let producer = NodeBase::new(
        infrastructure
            .node_owner()
            .new_node_in(Arc::clone(&fast), "producer")
            .unwrap(),
    );
    let consumer = NodeBase::new(
        infrastructure
            .node_owner()
            .new_node_in(Arc::clone(&medium), "consumer")
            .unwrap(),
    );

    let source = Arc::new(producer.event_source::<u64>());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&seen);
    let sink = consumer.event_sink(move |value| store.lock().push(value));
    source.as_ref() >> &sink;

    // The producer fires a running counter on every fast work tick.
    let tick_source = Arc::clone(&source);
    let _worker = producer
        .make_child(|args| {
            let mut next = 0u64;
            RegionWorkerNode::new(
                move || {
                    tick_source.fire(next);
                    next += 1;
                },
                args,
            )
        })
        .unwrap();

    infrastructure.start_scheduler().unwrap();
    thread::sleep(Duration::from_millis(500));
    infrastructure.stop_scheduler().unwrap();

    let seen = seen.lock();
    assert!(
        !seen.is_empty(),
        "expected events to cross the rate boundary"
    );
    // Events arrive aggregated but in production order.
    let mut sorted = seen.clone();
    sorted.sort_unstable();
    assert_eq!(*seen, sorted);
    assert!(infrastructure.cycle_control().last_exception().is_none());
}

#[test]
#[serial]
fn test_sampled_state_reaches_faster_region() {
    init_tracing();

    let infrastructure = Infrastructure::new();
    let fast = infrastructure.add_region("fast", FAST_TICK).unwrap();
    let medium = infrastructure.add_region("medium", MEDIUM_TICK).unwrap();

    let producer = NodeBase::new(
        infrastructure
            .node_owner()
            .new_node_in(Arc::clone(&medium), "producer")
            .unwrap(),
    );
    let consumer = NodeBase::new(
        infrastructure
            .node_owner()
            .new_node_in(Arc::clone(&fast), "consumer")
            .unwrap(),
    );

    let level = Arc::new(Mutex::new(0i64));
    let shared = Arc::clone(&level);
    let source = producer.state_source(move || *shared.lock());
    let sink = consumer.state_sink::<i64>();
    &source >> &sink;

    *level.lock() = 17;
    infrastructure.start_scheduler().unwrap();
    thread::sleep(Duration::from_millis(500));

    // The fast consumer samples the latest medium-rate value.
    assert_eq!(sink.get().unwrap(), 17);

    infrastructure.stop_scheduler().unwrap();
}
