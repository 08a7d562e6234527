//! Connection composition with the `>>` operator
//!
//! A connection is built left to right: `source >> transform >> .. >> sink`.
//! Until the active end meets its matching passive end the value is an open,
//! move-only proxy; completing the connection installs the composed chain on
//! the active port and returns a [`PortConnection`] marker. Any
//! parenthesization of the same chain produces the same runtime behavior.
//!
//! Open chains carry endpoint metadata (port id, region, disconnect
//! registrar, graph handle) so that completing a connection can register
//! disconnect callbacks, record the edge with the graph observer, and decide
//! whether a cross-region buffer must be spliced in.

use std::ops::Shr;
use std::sync::Arc;

use crate::buffer::{wire_event_buffer, wire_state_buffer, EventBuffer, StateBuffer};
use crate::error::FlowResult;
use crate::graph::GraphHandle;
use crate::region::ParallelRegion;

use super::event::{EventSink, EventSource, Registrar};
use super::next_port_id;
use super::state::{StateSink, StateSource};

/// Metadata describing the far end of an open chain.
///
/// This is what `get_source`/`get_sink` traversal yields in the original
/// template formulation: the ultimate endpoint of a composed connection.
pub(crate) struct EndpointMeta {
    pub(crate) port_id: Option<u64>,
    pub(crate) region: Option<Arc<ParallelRegion>>,
    pub(crate) graph: Option<GraphHandle>,
    pub(crate) registrar: Option<Registrar>,
}

impl EndpointMeta {
    /// Endpoint of a chain that does not terminate in a port, e.g. a
    /// `constant` producer.
    pub(crate) fn detached() -> Self {
        Self {
            port_id: None,
            region: None,
            graph: None,
            registrar: None,
        }
    }
}

/// Marker for a completed connection between two ports.
///
/// Carries no runtime information or access to the ports.
#[derive(Debug)]
pub struct PortConnection {
    _private: (),
}

impl PortConnection {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// A pure, cloneable transformation usable inside connection chains.
///
/// Built with [`super::lambda`] or the named combinators. Transforms are
/// `Fn` (not `FnMut`) so that a single transform can be lifted across all
/// members of a mux; stateful logic belongs into sinks and nodes.
pub struct Transform<I: 'static, O: 'static> {
    f: Arc<dyn Fn(I) -> O + Send + Sync>,
}

impl<I, O> Transform<I, O> {
    pub(crate) fn from_fn<F>(f: F) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Applies the transformation.
    pub fn call(&self, input: I) -> O {
        (self.f)(input)
    }
}

impl<I, O> Clone for Transform<I, O> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

/// Open event connection: an active source plus accumulated transforms.
pub struct EventChain<'a, T: 'static, U: 'static> {
    source: &'a EventSource<T>,
    chain: Box<dyn FnMut(T) -> U + Send>,
}

/// Open passive event chain: transforms ending in an event sink.
pub struct SinkChain<I: 'static> {
    chain: Box<dyn FnMut(I) + Send>,
    sink: EndpointMeta,
}

/// Open passive state chain: a producer (state source or constant) plus
/// accumulated transforms.
pub struct StateChain<U: 'static> {
    chain: Box<dyn FnMut() -> FlowResult<U> + Send>,
    source: EndpointMeta,
}

impl<U> StateChain<U> {
    pub(crate) fn from_parts(
        chain: Box<dyn FnMut() -> FlowResult<U> + Send>,
        source: EndpointMeta,
    ) -> Self {
        Self { chain, source }
    }
}

/// Open state connection built from the active side: a state sink plus
/// transforms accumulated on its left.
pub struct StateSinkProxy<'a, I: 'static, T: 'static> {
    pre: Box<dyn FnMut(I) -> T + Send>,
    sink: &'a StateSink<T>,
}

/// How a completed connection crosses region boundaries.
enum Boundary {
    /// Same region (or at least one bare port): synchronous pass-through.
    Direct,
    /// Different regions ticking at the same rate.
    SameRate {
        active: Arc<ParallelRegion>,
        passive: Arc<ParallelRegion>,
    },
    /// Different regions ticking at different rates.
    CrossRate {
        active: Arc<ParallelRegion>,
        passive: Arc<ParallelRegion>,
    },
}

fn boundary(active: Option<&Arc<ParallelRegion>>, passive: Option<&Arc<ParallelRegion>>) -> Boundary {
    match (active, passive) {
        (Some(active), Some(passive)) if active.id() != passive.id() => {
            if active.tick_duration() == passive.tick_duration() {
                Boundary::SameRate {
                    active: Arc::clone(active),
                    passive: Arc::clone(passive),
                }
            } else {
                Boundary::CrossRate {
                    active: Arc::clone(active),
                    passive: Arc::clone(passive),
                }
            }
        }
        _ => Boundary::Direct,
    }
}

fn record_edge(source: Option<&GraphHandle>, sink: Option<&GraphHandle>) {
    if let (Some(source), Some(sink)) = (source, sink) {
        source.observer.add_connection(&source.port, &sink.port);
    }
}

/// Completes an event connection from `source` through `chain` to the sink
/// described by `sink`. Splices an event buffer in when the endpoints live
/// in different regions.
pub(crate) fn complete_event<T>(
    source: &EventSource<T>,
    chain: Box<dyn FnMut(T) + Send>,
    sink: EndpointMeta,
) -> PortConnection
where
    T: Clone + Send + 'static,
{
    record_edge(source.graph.as_ref(), sink.graph.as_ref());
    match boundary(source.region.as_ref(), sink.region.as_ref()) {
        Boundary::Direct => {
            let key = sink.port_id.unwrap_or_else(next_port_id);
            source.attach(key, chain, sink.registrar.as_ref());
        }
        Boundary::SameRate { active, passive } => {
            let buffer = Arc::new(EventBuffer::new());
            buffer.out().attach(
                sink.port_id.unwrap_or_else(next_port_id),
                chain,
                sink.registrar.as_ref(),
            );
            wire_event_buffer(&buffer, &active, &passive, true);
            let writer = Arc::clone(&buffer);
            source.attach(next_port_id(), Box::new(move |event| writer.push(event)), None);
        }
        Boundary::CrossRate { active, passive } => {
            let buffer = Arc::new(EventBuffer::new());
            buffer.out().attach(
                sink.port_id.unwrap_or_else(next_port_id),
                chain,
                sink.registrar.as_ref(),
            );
            wire_event_buffer(&buffer, &active, &passive, false);
            let writer = Arc::clone(&buffer);
            source.attach(next_port_id(), Box::new(move |event| writer.push(event)), None);
        }
    }
    PortConnection::new()
}

/// Completes a state connection from the producer chain described by
/// `source` into the active `sink`. Splices a state buffer in when the
/// endpoints live in different regions.
pub(crate) fn complete_state<T>(
    sink: &StateSink<T>,
    chain: Box<dyn FnMut() -> FlowResult<T> + Send>,
    source: EndpointMeta,
) -> PortConnection
where
    T: Clone + Default + Send + 'static,
{
    record_edge(source.graph.as_ref(), sink.graph.as_ref());
    // The state sink drives the connection, so it is the active side.
    match boundary(sink.region.as_ref(), source.region.as_ref()) {
        Boundary::Direct => {
            sink.install(chain, &source);
        }
        Boundary::SameRate { active, passive } => {
            let buffer = Arc::new(StateBuffer::new(chain));
            wire_state_buffer(&buffer, &active, &passive, true);
            let reader = Arc::clone(&buffer);
            sink.install(Box::new(move || Ok(reader.read())), &EndpointMeta::detached());
        }
        Boundary::CrossRate { active, passive } => {
            let buffer = Arc::new(StateBuffer::new(chain));
            wire_state_buffer(&buffer, &active, &passive, false);
            let reader = Arc::clone(&buffer);
            sink.install(Box::new(move || Ok(reader.read())), &EndpointMeta::detached());
        }
    }
    PortConnection::new()
}

// --- event side -------------------------------------------------------------

impl<'a, 'b, T> Shr<&'b EventSink<T>> for &'a EventSource<T>
where
    T: Clone + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, sink: &'b EventSink<T>) -> PortConnection {
        let mut handler = sink.weak_handler();
        complete_event(self, Box::new(move |event| handler(event)), sink.meta())
    }
}

impl<'a, T, U> Shr<Transform<T, U>> for &'a EventSource<T>
where
    T: 'static,
    U: 'static,
{
    type Output = EventChain<'a, T, U>;

    fn shr(self, transform: Transform<T, U>) -> EventChain<'a, T, U> {
        EventChain {
            source: self,
            chain: Box::new(move |event| transform.call(event)),
        }
    }
}

impl<'a, T, U, V> Shr<Transform<U, V>> for EventChain<'a, T, U> {
    type Output = EventChain<'a, T, V>;

    fn shr(self, transform: Transform<U, V>) -> EventChain<'a, T, V> {
        let mut chain = self.chain;
        EventChain {
            source: self.source,
            chain: Box::new(move |event| transform.call(chain(event))),
        }
    }
}

impl<'a, 'b, T, U> Shr<&'b EventSink<U>> for EventChain<'a, T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, sink: &'b EventSink<U>) -> PortConnection {
        let mut chain = self.chain;
        let mut handler = sink.weak_handler();
        complete_event(
            self.source,
            Box::new(move |event| handler(chain(event))),
            sink.meta(),
        )
    }
}

impl<'a, T, U> Shr<SinkChain<U>> for EventChain<'a, T, U>
where
    T: Clone + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, rhs: SinkChain<U>) -> PortConnection {
        let mut chain = self.chain;
        let mut tail = rhs.chain;
        complete_event(
            self.source,
            Box::new(move |event| tail(chain(event))),
            rhs.sink,
        )
    }
}

impl<'a, T> Shr<SinkChain<T>> for &'a EventSource<T>
where
    T: Clone + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, rhs: SinkChain<T>) -> PortConnection {
        complete_event(self, rhs.chain, rhs.sink)
    }
}

impl<'b, I, O> Shr<&'b EventSink<O>> for Transform<I, O>
where
    I: 'static,
    O: Send + 'static,
{
    type Output = SinkChain<I>;

    fn shr(self, sink: &'b EventSink<O>) -> SinkChain<I> {
        let mut handler = sink.weak_handler();
        SinkChain {
            chain: Box::new(move |input| handler(self.call(input))),
            sink: sink.meta(),
        }
    }
}

impl<H, I> Shr<SinkChain<I>> for Transform<H, I> {
    type Output = SinkChain<H>;

    fn shr(self, rhs: SinkChain<I>) -> SinkChain<H> {
        let mut tail = rhs.chain;
        SinkChain {
            chain: Box::new(move |input| tail(self.call(input))),
            sink: rhs.sink,
        }
    }
}

// --- transform composition --------------------------------------------------

impl<I, O, P> Shr<Transform<O, P>> for Transform<I, O> {
    type Output = Transform<I, P>;

    fn shr(self, rhs: Transform<O, P>) -> Transform<I, P> {
        Transform::from_fn(move |input| rhs.call(self.call(input)))
    }
}

// --- state side -------------------------------------------------------------

impl<'a, 'b, T> Shr<&'b StateSink<T>> for &'a StateSource<T>
where
    T: Clone + Default + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, sink: &'b StateSink<T>) -> PortConnection {
        complete_state(sink, Box::new(self.weak_producer()), self.meta())
    }
}

impl<'a, T, U> Shr<Transform<T, U>> for &'a StateSource<T>
where
    T: Send + 'static,
    U: 'static,
{
    type Output = StateChain<U>;

    fn shr(self, transform: Transform<T, U>) -> StateChain<U> {
        let mut producer = self.weak_producer();
        StateChain {
            chain: Box::new(move || producer().map(|value| transform.call(value))),
            source: self.meta(),
        }
    }
}

impl<U, V> Shr<Transform<U, V>> for StateChain<U> {
    type Output = StateChain<V>;

    fn shr(self, transform: Transform<U, V>) -> StateChain<V> {
        let mut chain = self.chain;
        StateChain {
            chain: Box::new(move || chain().map(|value| transform.call(value))),
            source: self.source,
        }
    }
}

impl<'b, U> Shr<&'b StateSink<U>> for StateChain<U>
where
    U: Clone + Default + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, sink: &'b StateSink<U>) -> PortConnection {
        complete_state(sink, self.chain, self.source)
    }
}

impl<'b, I, T> Shr<&'b StateSink<T>> for Transform<I, T>
where
    I: 'static,
    T: 'static,
{
    type Output = StateSinkProxy<'b, I, T>;

    fn shr(self, sink: &'b StateSink<T>) -> StateSinkProxy<'b, I, T> {
        StateSinkProxy {
            pre: Box::new(move |input| self.call(input)),
            sink,
        }
    }
}

impl<'b, H, I, T> Shr<StateSinkProxy<'b, I, T>> for Transform<H, I> {
    type Output = StateSinkProxy<'b, H, T>;

    fn shr(self, rhs: StateSinkProxy<'b, I, T>) -> StateSinkProxy<'b, H, T> {
        let mut pre = rhs.pre;
        StateSinkProxy {
            pre: Box::new(move |input| pre(self.call(input))),
            sink: rhs.sink,
        }
    }
}

impl<'a, 'b, T, S> Shr<StateSinkProxy<'b, T, S>> for &'a StateSource<T>
where
    T: Send + 'static,
    S: Clone + Default + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, rhs: StateSinkProxy<'b, T, S>) -> PortConnection {
        let mut producer = self.weak_producer();
        let mut pre = rhs.pre;
        complete_state(
            rhs.sink,
            Box::new(move || producer().map(|value| pre(value))),
            self.meta(),
        )
    }
}

impl<'b, U, S> Shr<StateSinkProxy<'b, U, S>> for StateChain<U>
where
    S: Clone + Default + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, rhs: StateSinkProxy<'b, U, S>) -> PortConnection {
        let mut chain = self.chain;
        let mut pre = rhs.pre;
        complete_state(
            rhs.sink,
            Box::new(move || chain().map(|value| pre(value))),
            self.source,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::combinators::{add, lambda, negate};
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc as StdArc;

    #[test]
    fn test_event_chain_applies_transforms_in_order() {
        let source = EventSource::<i32>::new();
        let seen = StdArc::new(Mutex::new(Vec::new()));
        let store = StdArc::clone(&seen);
        let sink = EventSink::new(move |event| store.lock().push(event));

        &source >> add(1) >> lambda(|x: i32| x * 2) >> &sink;

        source.fire(20);
        assert_eq!(*seen.lock(), vec![42]);
    }

    #[test]
    fn test_chain_associativity() {
        // a >> b >> c >> d and (a >> b) >> (c >> d) behave identically.
        let flat_source = EventSource::<i32>::new();
        let grouped_source = EventSource::<i32>::new();
        let seen = StdArc::new(Mutex::new(Vec::new()));

        let store = StdArc::clone(&seen);
        let flat_sink = EventSink::new(move |event| store.lock().push(event));
        let store = StdArc::clone(&seen);
        let grouped_sink = EventSink::new(move |event| store.lock().push(event));

        &flat_source >> add(1) >> add(2) >> &flat_sink;
        (&grouped_source >> add(1)) >> (add(2) >> &grouped_sink);

        flat_source.fire(10);
        grouped_source.fire(10);
        assert_eq!(*seen.lock(), vec![13, 13]);
    }

    #[test]
    fn test_state_chain_pulls_through_transforms() {
        let source = StateSource::new(|| 7);
        let sink = StateSink::new();
        &source >> negate() >> &sink;
        assert_eq!(sink.get().unwrap(), -7);
    }

    #[test]
    fn test_active_sink_first_grouping() {
        let source = StateSource::new(|| 7);
        let sink = StateSink::new();
        // The right-hand group forms an active-sink-first proxy.
        &source >> (negate() >> &sink);
        assert_eq!(sink.get().unwrap(), -7);
    }

    #[test]
    fn test_transform_composition() {
        let double_then_negate = lambda(|x: i32| x * 2) >> negate();
        assert_eq!(double_then_negate.call(21), -42);
    }
}
