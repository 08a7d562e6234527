//! Reactive dataflow kernel for soft-realtime control and pipeline loads
//!
//! Programs are built as directed graphs of nodes exchanging values through
//! typed ports. Several activity rates (fast / medium / slow) run
//! concurrently; connections that cross a rate boundary are decoupled by
//! triple-buffered transport, so inter-rate communication is race-free and
//! deterministic with bounded latency.
//!
//! The kernel provides:
//! - the port model and its connection algebra (`source >> transform >> sink`),
//! - cross-region buffering with a directly-connected fast path,
//! - the node forest tying ports to regions,
//! - regions with switch and work ticks,
//! - the cycle control multiplexing periodic tasks onto a worker pool with
//!   per-cycle deadline enforcement.
//!
//! ```
//! use rateflow_core::{lambda, EventSink, EventSource};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! let source = EventSource::<i32>::new();
//! let last = Arc::new(Mutex::new(0));
//! let store = Arc::clone(&last);
//! let sink = EventSink::new(move |value| *store.lock() = value);
//!
//! &source >> lambda(|x: i32| x + 1) >> &sink;
//! source.fire(41);
//! assert_eq!(*last.lock(), 42);
//! ```

pub mod buffer;
pub mod clock;
pub mod error;
pub mod forest;
pub mod graph;
pub mod infrastructure;
pub mod nodes;
pub mod ports;
pub mod region;
pub mod scheduler;
pub mod settings;

pub use clock::{MasterClock, VirtualClock, WallClock};
pub use error::{FlowError, FlowResult};
pub use forest::{Forest, NodeArgs, NodeBase, NodeId, TreeNode};
pub use graph::{ConnectionGraph, GraphNodeInfo, GraphObserver, GraphPortInfo};
pub use infrastructure::Infrastructure;
pub use nodes::RegionWorkerNode;
pub use ports::{
    add, clamp, constant, divide, identity, lambda, merge, merge_all, multiply, mux, negate, not,
    subtract, tee, DynamicMerger, EventSink, EventSource, MergeNode, Mux, PortConnection,
    SettableStateSource, StateSink, StateSource, Transform,
};
pub use region::{ParallelRegion, RegionId, TickController};
pub use scheduler::{
    AfapMainLoop, BlockingScheduler, CycleControl, MainLoop, ParallelScheduler, PeriodicTask,
    RealtimeMainLoop, Scheduler, TimewarpMainLoop, FAST_TICK, MEDIUM_TICK, MIN_TICK_LENGTH,
    SLOW_TICK,
};
pub use settings::{always_valid, Setting, SettingId, SettingSetter};
