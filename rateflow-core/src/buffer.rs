//! Cross-region buffers
//!
//! Connections that cross a region boundary are decoupled by a
//! triple-buffered transfer station so that producer and consumer regions
//! never race on shared tokens. Each buffer holds three generations:
//!
//! - `incoming` — written by the producer side,
//! - `middle` — the hand-over generation,
//! - `outgoing` — read by the consumer side.
//!
//! Switch ticks advance generations; the consumer region's work tick
//! delivers (events) or refreshes (state) the outgoing generation. When both
//! regions tick at the same rate the middle generation is skipped and a
//! single switch moves incoming directly to outgoing.
//!
//! Many assertions about emptiness here may look redundant right after a
//! clear, but this code runs under two regions' ticks and races would
//! trigger them first.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::FlowResult;
use crate::ports::EventSource;
use crate::region::ParallelRegion;

struct EventGenerations<T> {
    incoming: Vec<T>,
    middle: Vec<T>,
    outgoing: Vec<T>,
    /// True when the middle generation has been handed to the consumer side
    /// since the last active switch.
    read: bool,
}

/// Buffer for events between two regions.
///
/// Events accumulate in the incoming generation. The producer region's
/// switch tick moves them towards the consumer; the consumer region's work
/// tick fires each outgoing event on the `out` port and clears the
/// generation. For `T = ()` the vectors degenerate into counters.
pub struct EventBuffer<T: 'static> {
    generations: Mutex<EventGenerations<T>>,
    out: EventSource<T>,
}

impl<T> EventBuffer<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            generations: Mutex::new(EventGenerations {
                incoming: Vec::new(),
                middle: Vec::new(),
                outgoing: Vec::new(),
                read: false,
            }),
            out: EventSource::new(),
        }
    }

    /// Producer-side input: stores `event` in the incoming generation.
    pub fn push(&self, event: T) {
        self.generations.lock().incoming.push(event);
    }

    /// Moves the incoming generation to the middle one.
    ///
    /// If the middle generation has already been handed over, the buffers
    /// can be swapped without data loss; otherwise the incoming events are
    /// appended so no generation is dropped between slow consumer ticks.
    pub fn switch_active(&self) {
        let generations = &mut *self.generations.lock();
        if generations.read {
            mem::swap(&mut generations.incoming, &mut generations.middle);
        } else {
            let pending = mem::take(&mut generations.incoming);
            generations.middle.extend(pending);
        }
        generations.read = false;
        generations.incoming.clear();
        debug_assert!(generations.incoming.is_empty());
    }

    /// Moves the middle generation to the outgoing one.
    ///
    /// The previous outgoing generation has already been processed at this
    /// point, so it is unconditionally replaced.
    pub fn switch_passive(&self) {
        let generations = &mut *self.generations.lock();
        mem::swap(&mut generations.middle, &mut generations.outgoing);
        generations.read = true;
        generations.middle.clear();
        debug_assert!(generations.middle.is_empty());
    }

    /// Same-rate shortcut: merges the incoming generation directly into the
    /// outgoing one.
    pub fn switch_active_passive(&self) {
        let generations = &mut *self.generations.lock();
        if generations.outgoing.is_empty() {
            mem::swap(&mut generations.incoming, &mut generations.outgoing);
        } else {
            let pending = mem::take(&mut generations.incoming);
            generations.outgoing.extend(pending);
        }
        generations.incoming.clear();
        debug_assert!(generations.incoming.is_empty());
    }

    /// Consumer-side work tick: fires every outgoing event, then clears the
    /// generation. Capacity is kept to avoid allocations in the next cycle.
    pub fn work(&self) {
        let batch = {
            let mut generations = self.generations.lock();
            mem::take(&mut generations.outgoing)
        };
        for event in batch {
            self.out.fire(event);
        }
    }

    /// Consumer-side output port.
    pub fn out(&self) -> &EventSource<T> {
        &self.out
    }
}

impl<T> Default for EventBuffer<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

struct StateGenerations<T> {
    incoming: T,
    middle: T,
    outgoing: T,
}

type StateProducer<T> = Box<dyn FnMut() -> FlowResult<T> + Send>;

/// Buffer for state between two regions.
///
/// The producer region's work tick pulls the connected producer chain into
/// the incoming generation; switch ticks copy generations forward; the
/// consumer reads the outgoing generation. All generations start at
/// `T::default()`.
pub struct StateBuffer<T: 'static> {
    generations: Mutex<StateGenerations<T>>,
    producer: Mutex<StateProducer<T>>,
}

impl<T> StateBuffer<T>
where
    T: Clone + Default + Send + 'static,
{
    /// Creates a buffer pulling from `producer` on the work tick.
    pub fn new(producer: StateProducer<T>) -> Self {
        Self {
            generations: Mutex::new(StateGenerations {
                incoming: T::default(),
                middle: T::default(),
                outgoing: T::default(),
            }),
            producer: Mutex::new(producer),
        }
    }

    /// Producer-side work tick: refreshes the incoming generation.
    ///
    /// A producer that reports `NotConnected` (its source was destroyed
    /// while the buffer is still wired to the regions) keeps the previous
    /// generation instead of unwinding a worker thread.
    pub fn work(&self) {
        let pulled = {
            let mut producer = self.producer.lock();
            (*producer)()
        };
        match pulled {
            Ok(value) => self.generations.lock().incoming = value,
            Err(error) => {
                tracing::warn!(error = %error, "state buffer could not pull its producer");
            }
        }
    }

    /// Copies the middle generation to the outgoing one.
    pub fn switch_active(&self) {
        let generations = &mut *self.generations.lock();
        generations.outgoing = generations.middle.clone();
    }

    /// Copies the incoming generation to the middle one.
    pub fn switch_passive(&self) {
        let generations = &mut *self.generations.lock();
        generations.middle = generations.incoming.clone();
    }

    /// Same-rate shortcut: copies the incoming generation directly to the
    /// outgoing one.
    pub fn switch_active_passive(&self) {
        let generations = &mut *self.generations.lock();
        generations.outgoing = generations.incoming.clone();
    }

    /// Consumer-side read of the outgoing generation.
    pub fn read(&self) -> T {
        self.generations.lock().outgoing.clone()
    }
}

/// Wires an event buffer's phases to the ticks of the two regions it
/// decouples, per the buffer-factory rule.
///
/// The buffer is jointly owned by the active side of the connection and the
/// tick handlers installed here.
pub(crate) fn wire_event_buffer<T>(
    buffer: &Arc<EventBuffer<T>>,
    active: &Arc<ParallelRegion>,
    passive: &Arc<ParallelRegion>,
    same_rate: bool,
) where
    T: Clone + Send + 'static,
{
    if same_rate {
        let shared = Arc::clone(buffer);
        active
            .switch_tick()
            .connect(move |()| shared.switch_active_passive());
    } else {
        let shared = Arc::clone(buffer);
        active.switch_tick().connect(move |()| shared.switch_active());
        let shared = Arc::clone(buffer);
        passive
            .switch_tick()
            .connect(move |()| shared.switch_passive());
    }
    let shared = Arc::clone(buffer);
    passive.work_tick().connect(move |()| shared.work());
}

/// Wires a state buffer's phases to the ticks of the two regions it
/// decouples, per the buffer-factory rule.
pub(crate) fn wire_state_buffer<T>(
    buffer: &Arc<StateBuffer<T>>,
    active: &Arc<ParallelRegion>,
    passive: &Arc<ParallelRegion>,
    same_rate: bool,
) where
    T: Clone + Default + Send + 'static,
{
    if same_rate {
        let shared = Arc::clone(buffer);
        active
            .switch_tick()
            .connect(move |()| shared.switch_active_passive());
    } else {
        let shared = Arc::clone(buffer);
        active.switch_tick().connect(move |()| shared.switch_active());
        let shared = Arc::clone(buffer);
        passive
            .switch_tick()
            .connect(move |()| shared.switch_passive());
    }
    let shared = Arc::clone(buffer);
    passive.work_tick().connect(move |()| shared.work());
}
