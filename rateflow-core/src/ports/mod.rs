//! Typed ports and their connection algebra
//!
//! Four port kinds move tokens through the dataflow graph:
//!
//! - [`EventSource`] — active source, pushes zero or more events to its
//!   handlers,
//! - [`EventSink`] — passive sink, reacts to a single incoming event,
//! - [`StateSource`] — passive source, produces a value when pulled,
//! - [`StateSink`] — active sink, pulls its connected producer on demand.
//!
//! Ports are composed with the `>>` operator into chains, optionally through
//! [`Transform`] pieces built with [`lambda`] or the named combinators. A
//! chain completes once an active end meets its matching passive end; the
//! type system rejects connecting two active ends. Connecting ports that
//! live in different regions transparently splices a cross-region buffer
//! into the chain.

mod chain;
mod combinators;
mod event;
mod mux;
mod state;

pub use chain::{EventChain, PortConnection, SinkChain, StateChain, StateSinkProxy, Transform};
pub use combinators::{
    add, clamp, constant, divide, identity, lambda, multiply, negate, not, subtract, tee,
};
pub use event::{EventSink, EventSource};
pub use mux::{merge, merge_all, DynamicMerger, MergeNode, Mux};
pub use state::{SettableStateSource, StateSink, StateSource};

use std::sync::atomic::{AtomicU64, Ordering};

/// Disconnect callback installed by an active port on its passive peers.
///
/// The argument is the stable id of the port that is going away.
pub(crate) type BreakerFn = dyn Fn(u64) + Send + Sync;

static PORT_IDS: AtomicU64 = AtomicU64::new(1);

/// Stable identifier for a port, preserved across moves.
pub(crate) fn next_port_id() -> u64 {
    PORT_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Convenience alias for grouping several ports, see [`Mux`].
pub fn mux<P>(ports: Vec<P>) -> Mux<P> {
    Mux::new(ports)
}
