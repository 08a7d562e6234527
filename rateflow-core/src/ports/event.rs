//! Event source and event sink ports

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::chain::EndpointMeta;
use super::{next_port_id, BreakerFn};
use crate::error::{FlowError, FlowResult};
use crate::graph::GraphHandle;
use crate::region::ParallelRegion;

type Handler<T> = Box<dyn FnMut(T) + Send>;

/// Registry of weak disconnect callbacks held by a passive port.
pub(crate) type Registrar = Arc<Mutex<Vec<Weak<BreakerFn>>>>;

struct HandlerTable<T> {
    /// Handlers in registration order, keyed by the id of the sink at the
    /// end of the connected chain (or a fresh id for raw handlers).
    entries: Vec<(u64, Handler<T>)>,
}

/// Output port for events.
///
/// An event source is the active end of event connections: `fire` pushes a
/// token to every connected handler in registration order. Use `T = ()` for
/// events without payload.
///
/// Connection changes are not thread safe with respect to `fire`; all
/// connections must be made serially, before the graph starts ticking or in
/// a quiesced state.
pub struct EventSource<T> {
    handlers: Arc<Mutex<HandlerTable<T>>>,
    /// Erase-by-id callback handed to sinks as a weak reference. A sink that
    /// is destroyed invokes it to remove its handler entry from this source;
    /// when the source is destroyed first, the weak references simply expire
    /// and sinks never see a call.
    erase: Arc<BreakerFn>,
    pub(crate) region: Option<Arc<ParallelRegion>>,
    pub(crate) graph: Option<GraphHandle>,
}

impl<T: 'static> EventSource<T> {
    /// Creates a source with no handlers and no region affiliation.
    pub fn new() -> Self {
        let handlers = Arc::new(Mutex::new(HandlerTable {
            entries: Vec::new(),
        }));
        let weak = Arc::downgrade(&handlers);
        let erase: Arc<BreakerFn> = Arc::new(move |key| {
            if let Some(table) = weak.upgrade() {
                table.lock().entries.retain(|(id, _)| *id != key);
            }
        });
        Self {
            handlers,
            erase,
            region: None,
            graph: None,
        }
    }

    /// Sends `event` to all connected handlers in registration order.
    ///
    /// Safe to call with zero handlers (no-op). A handler panicking
    /// propagates to the firing thread.
    pub fn fire(&self, event: T)
    where
        T: Clone,
    {
        let mut table = self.handlers.lock();
        for (_, handler) in table.entries.iter_mut() {
            handler(event.clone());
        }
    }

    /// Number of handlers currently connected to this port.
    pub fn nr_connected_handlers(&self) -> usize {
        self.handlers.lock().entries.len()
    }

    /// Connects a raw handler that does not take part in the disconnect
    /// protocol. Prefer `source >> sink` for connections that must be broken
    /// when either endpoint is destroyed.
    pub fn connect<F>(&self, handler: F) -> super::PortConnection
    where
        F: FnMut(T) + Send + 'static,
    {
        self.attach(next_port_id(), Box::new(handler), None);
        super::PortConnection::new()
    }

    /// Stores a handler under `key` and registers the erase callback with
    /// the sink's registrar when the chain ends in a registering sink.
    pub(crate) fn attach(&self, key: u64, handler: Handler<T>, registrar: Option<&Registrar>) {
        self.handlers.lock().entries.push((key, handler));
        if let Some(registrar) = registrar {
            registrar.lock().push(Arc::downgrade(&self.erase));
        }
    }
}

impl<T: 'static> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct SinkSlot<T> {
    handler: Option<Handler<T>>,
}

/// Input port for events.
///
/// An event sink holds exactly one handler and is the passive end of event
/// connections. Its destructor invokes every still-live disconnect callback
/// registered by connected sources, so destroying the sink breaks all
/// connections to it.
pub struct EventSink<T> {
    slot: Arc<Mutex<SinkSlot<T>>>,
    /// Weak erase callbacks registered by sources connected to this sink.
    breakers: Registrar,
    id: u64,
    pub(crate) region: Option<Arc<ParallelRegion>>,
    pub(crate) graph: Option<GraphHandle>,
}

impl<T> EventSink<T> {
    /// Creates a sink that runs `handler` for every incoming event.
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(SinkSlot {
                handler: Some(Box::new(handler)),
            })),
            breakers: Arc::new(Mutex::new(Vec::new())),
            id: next_port_id(),
            region: None,
            graph: None,
        }
    }

    /// Applies the stored handler to `event`.
    pub fn invoke(&self, event: T) -> FlowResult<()> {
        let mut slot = self.slot.lock();
        match slot.handler.as_mut() {
            Some(handler) => {
                handler(event);
                Ok(())
            }
            None => Err(FlowError::NotConnected),
        }
    }

    /// Handler closure held by a connected source. Goes inert when the sink
    /// is dropped, independently of the disconnect callback.
    pub(crate) fn weak_handler(&self) -> impl FnMut(T) + Send + 'static
    where
        T: Send + 'static,
    {
        let weak = Arc::downgrade(&self.slot);
        move |event| {
            if let Some(slot) = weak.upgrade() {
                if let Some(handler) = slot.lock().handler.as_mut() {
                    handler(event);
                }
            }
        }
    }

    pub(crate) fn meta(&self) -> EndpointMeta {
        EndpointMeta {
            port_id: Some(self.id),
            region: self.region.clone(),
            graph: self.graph.clone(),
            registrar: Some(Arc::clone(&self.breakers)),
        }
    }
}

impl<T> Drop for EventSink<T> {
    fn drop(&mut self) {
        for weak in self.breakers.lock().drain(..) {
            if let Some(breaker) = weak.upgrade() {
                breaker(self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn recording_sink() -> (EventSink<i32>, StdArc<Mutex<Vec<i32>>>) {
        let seen = StdArc::new(Mutex::new(Vec::new()));
        let store = StdArc::clone(&seen);
        let sink = EventSink::new(move |event| store.lock().push(event));
        (sink, seen)
    }

    #[test]
    fn test_fire_without_handlers_is_a_noop() {
        let source = EventSource::<i32>::new();
        source.fire(1);
        assert_eq!(source.nr_connected_handlers(), 0);
    }

    #[test]
    fn test_handlers_observe_events_in_registration_order() {
        let source = EventSource::<i32>::new();
        let order = StdArc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = StdArc::clone(&order);
            source.connect(move |event: i32| order.lock().push((tag, event)));
        }

        source.fire(7);

        assert_eq!(*order.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_sink_invoke_applies_handler() {
        let (sink, seen) = recording_sink();
        sink.invoke(41).unwrap();
        assert_eq!(*seen.lock(), vec![41]);
    }

    #[test]
    fn test_destroying_sink_disconnects_it_from_source() {
        let source = EventSource::<i32>::new();
        {
            let (sink, _seen) = recording_sink();
            &source >> &sink;
            assert_eq!(source.nr_connected_handlers(), 1);
        }
        assert_eq!(source.nr_connected_handlers(), 0);
        source.fire(1);
    }

    #[test]
    fn test_destroying_source_leaves_sink_alive() {
        let (sink, seen) = recording_sink();
        {
            let source = EventSource::<i32>::new();
            &source >> &sink;
            source.fire(3);
        }
        sink.invoke(4).unwrap();
        assert_eq!(*seen.lock(), vec![3, 4]);
    }
}
