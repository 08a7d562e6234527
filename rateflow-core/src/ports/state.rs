//! State source and state sink ports

use std::sync::Arc;

use parking_lot::Mutex;

use super::chain::EndpointMeta;
use super::event::Registrar;
use super::{next_port_id, BreakerFn};
use crate::error::{FlowError, FlowResult};
use crate::graph::GraphHandle;
use crate::region::ParallelRegion;

type Producer<T> = Box<dyn FnMut() -> FlowResult<T> + Send>;

/// Output port for states.
///
/// A state source is passive: it holds one producer which is queried when a
/// connected state sink pulls. Destroying the source severs all sinks
/// connected to it.
pub struct StateSource<T> {
    producer: Arc<Mutex<Producer<T>>>,
    /// Weak disconnect callbacks registered by connected sinks.
    breakers: Registrar,
    id: u64,
    pub(crate) region: Option<Arc<ParallelRegion>>,
    pub(crate) graph: Option<GraphHandle>,
}

impl<T> StateSource<T> {
    /// Creates a source producing values through `f`.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        let mut f = f;
        Self::from_fallible(move || Ok(f()))
    }

    /// Creates a source whose producer may itself report a structural error,
    /// used by composite nodes that pull further ports.
    pub fn from_fallible<F>(f: F) -> Self
    where
        F: FnMut() -> FlowResult<T> + Send + 'static,
    {
        Self {
            producer: Arc::new(Mutex::new(Box::new(f))),
            breakers: Arc::new(Mutex::new(Vec::new())),
            id: next_port_id(),
            region: None,
            graph: None,
        }
    }

    /// Queries the stored producer.
    pub fn get(&self) -> FlowResult<T> {
        let mut producer = self.producer.lock();
        (*producer)()
    }

    /// Producer closure stored by a connected sink. Reports `NotConnected`
    /// once the source is gone, independently of the disconnect callback.
    pub(crate) fn weak_producer(&self) -> impl FnMut() -> FlowResult<T> + Send + 'static
    where
        T: Send + 'static,
    {
        let weak = Arc::downgrade(&self.producer);
        move || match weak.upgrade() {
            Some(producer) => {
                let mut producer = producer.lock();
                (*producer)()
            }
            None => Err(FlowError::NotConnected),
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

impl<T> Drop for StateSource<T> {
    fn drop(&mut self) {
        for weak in self.breakers.lock().drain(..) {
            if let Some(breaker) = weak.upgrade() {
                breaker(self.id);
            }
        }
    }
}

struct SinkState<T> {
    producer: Option<Producer<T>>,
    /// Id of the source currently feeding this sink. Checked by the
    /// disconnect callback so that a source replaced by a later `connect`
    /// cannot sever the new connection when it is destroyed.
    current_source: Option<u64>,
}

/// Input port for states.
///
/// A state sink is the active end of state connections: `get` pulls the
/// connected producer chain on demand. A sink has at most one producer;
/// reconnecting replaces the previous one and deregisters its source.
pub struct StateSink<T> {
    inner: Arc<Mutex<SinkState<T>>>,
    /// Disconnect callback handed to sources as a weak reference.
    breaker: Arc<BreakerFn>,
    pub(crate) region: Option<Arc<ParallelRegion>>,
    pub(crate) graph: Option<GraphHandle>,
}

impl<T: 'static> StateSink<T> {
    /// Creates an unconnected sink.
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(SinkState {
            producer: None,
            current_source: None,
        }));
        let weak = Arc::downgrade(&inner);
        let breaker: Arc<BreakerFn> = Arc::new(move |source_id| {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock();
                if state.current_source == Some(source_id) {
                    state.producer = None;
                    state.current_source = None;
                }
            }
        });
        Self {
            inner,
            breaker,
            region: None,
            graph: None,
        }
    }

    /// Pulls the current state from the connected producer chain.
    pub fn get(&self) -> FlowResult<T> {
        let mut state = self.inner.lock();
        match state.producer.as_mut() {
            Some(producer) => (*producer)(),
            None => Err(FlowError::NotConnected),
        }
    }

    /// Installs `producer`, replacing any previous connection, and registers
    /// the disconnect callback with the new source when it supports it.
    pub(crate) fn install(&self, producer: Producer<T>, source: &EndpointMeta) {
        {
            let mut state = self.inner.lock();
            state.producer = Some(producer);
            state.current_source = source.port_id;
        }
        if let Some(registrar) = source.registrar.as_ref() {
            registrar.lock().push(Arc::downgrade(&self.breaker));
        }
    }
}

impl<T: 'static> Default for StateSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// State source whose value can be set from outside the dataflow graph.
///
/// Useful at the boundary towards imperative code: the embedding program
/// stores a value, connected sinks pull it like any other state.
pub struct SettableStateSource<T> {
    value: Arc<Mutex<T>>,
    source: StateSource<T>,
}

impl<T> SettableStateSource<T>
where
    T: Clone + Send + 'static,
{
    /// Creates the source holding `initial`.
    pub fn new(initial: T) -> Self {
        let value = Arc::new(Mutex::new(initial));
        let shared = Arc::clone(&value);
        Self {
            value,
            source: StateSource::new(move || shared.lock().clone()),
        }
    }

    /// Stores a new value; connected sinks see it on their next pull.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    /// The state source to connect sinks to.
    pub fn source(&self) -> &StateSource<T> {
        &self.source
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }
}
