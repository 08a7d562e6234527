//! Multiplexed ports and merge nodes
//!
//! [`Mux`] groups several ports of the same kind so they can be connected
//! element-wise or lifted through a single transform. [`MergeNode`] folds N
//! state inputs into one state output through an N-ary operation;
//! [`DynamicMerger`] collects its inputs into a container instead.

use std::ops::Shr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::chain::{EventChain, PortConnection, StateChain, Transform};
use super::event::{EventSink, EventSource};
use super::state::{StateSink, StateSource};
use crate::error::{FlowError, FlowResult};

/// A group of ports of one kind, connected element-wise.
pub struct Mux<P> {
    ports: Vec<P>,
}

impl<P> Mux<P> {
    /// Groups `ports` for element-wise connection.
    pub fn new(ports: Vec<P>) -> Self {
        Self { ports }
    }

    /// Number of grouped ports.
    pub fn arity(&self) -> usize {
        self.ports.len()
    }
}

fn check_arity(lhs: usize, rhs: usize) {
    assert_eq!(
        lhs, rhs,
        "bad dataflow structure: mux ports need the same number of subports ({lhs} vs {rhs})"
    );
}

// --- lifting a scalar transform across all members ---------------------------

impl<'a, T, U> Shr<Transform<T, U>> for Mux<&'a StateSource<T>>
where
    T: Send + 'static,
    U: 'static,
{
    type Output = Mux<StateChain<U>>;

    fn shr(self, transform: Transform<T, U>) -> Mux<StateChain<U>> {
        Mux::new(
            self.ports
                .into_iter()
                .map(|port| port >> transform.clone())
                .collect(),
        )
    }
}

impl<U, V> Shr<Transform<U, V>> for Mux<StateChain<U>> {
    type Output = Mux<StateChain<V>>;

    fn shr(self, transform: Transform<U, V>) -> Mux<StateChain<V>> {
        Mux::new(
            self.ports
                .into_iter()
                .map(|chain| chain >> transform.clone())
                .collect(),
        )
    }
}

impl<'a, T, U> Shr<Transform<T, U>> for Mux<&'a EventSource<T>>
where
    T: 'static,
    U: 'static,
{
    type Output = Mux<EventChain<'a, T, U>>;

    fn shr(self, transform: Transform<T, U>) -> Mux<EventChain<'a, T, U>> {
        Mux::new(
            self.ports
                .into_iter()
                .map(|port| port >> transform.clone())
                .collect(),
        )
    }
}

impl<'a, T, U, V> Shr<Transform<U, V>> for Mux<EventChain<'a, T, U>> {
    type Output = Mux<EventChain<'a, T, V>>;

    fn shr(self, transform: Transform<U, V>) -> Mux<EventChain<'a, T, V>> {
        Mux::new(
            self.ports
                .into_iter()
                .map(|chain| chain >> transform.clone())
                .collect(),
        )
    }
}

// --- element-wise pairing ----------------------------------------------------

impl<'a, 'b, T> Shr<Mux<&'b EventSink<T>>> for Mux<&'a EventSource<T>>
where
    T: Clone + Send + 'static,
{
    type Output = Vec<PortConnection>;

    fn shr(self, sinks: Mux<&'b EventSink<T>>) -> Vec<PortConnection> {
        check_arity(self.ports.len(), sinks.ports.len());
        self.ports
            .into_iter()
            .zip(sinks.ports)
            .map(|(source, sink)| source >> sink)
            .collect()
    }
}

impl<'a, 'b, T, U> Shr<Mux<&'b EventSink<U>>> for Mux<EventChain<'a, T, U>>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    type Output = Vec<PortConnection>;

    fn shr(self, sinks: Mux<&'b EventSink<U>>) -> Vec<PortConnection> {
        check_arity(self.ports.len(), sinks.ports.len());
        self.ports
            .into_iter()
            .zip(sinks.ports)
            .map(|(chain, sink)| chain >> sink)
            .collect()
    }
}

impl<'a, 'b, T> Shr<Mux<&'b StateSink<T>>> for Mux<&'a StateSource<T>>
where
    T: Clone + Default + Send + 'static,
{
    type Output = Vec<PortConnection>;

    fn shr(self, sinks: Mux<&'b StateSink<T>>) -> Vec<PortConnection> {
        check_arity(self.ports.len(), sinks.ports.len());
        self.ports
            .into_iter()
            .zip(sinks.ports)
            .map(|(source, sink)| source >> sink)
            .collect()
    }
}

impl<'b, U> Shr<Mux<&'b StateSink<U>>> for Mux<StateChain<U>>
where
    U: Clone + Default + Send + 'static,
{
    type Output = Vec<PortConnection>;

    fn shr(self, sinks: Mux<&'b StateSink<U>>) -> Vec<PortConnection> {
        check_arity(self.ports.len(), sinks.ports.len());
        self.ports
            .into_iter()
            .zip(sinks.ports)
            .map(|(chain, sink)| chain >> sink)
            .collect()
    }
}

// --- merging into a single stream --------------------------------------------

impl<'b, T, R> Shr<&'b MergeNode<T, R>> for Mux<StateChain<T>>
where
    T: Clone + Default + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, node: &'b MergeNode<T, R>) -> PortConnection {
        for chain in self.ports {
            let sink = node.input();
            chain >> sink.as_ref();
        }
        PortConnection::new()
    }
}

impl<'a, 'b, T, R> Shr<&'b MergeNode<T, R>> for Mux<&'a StateSource<T>>
where
    T: Clone + Default + Send + 'static,
{
    type Output = PortConnection;

    fn shr(self, node: &'b MergeNode<T, R>) -> PortConnection {
        for source in self.ports {
            let sink = node.input();
            source >> sink.as_ref();
        }
        PortConnection::new()
    }
}

/// Merges all input states to one output state by a given operation.
///
/// Input sinks are allocated on demand, one per connected stream; the output
/// value is `op` applied to all current inputs in connection order.
pub struct MergeNode<T: 'static, R: 'static> {
    inputs: Arc<Mutex<Vec<Arc<StateSink<T>>>>>,
    out: StateSource<R>,
}

impl<T, R> MergeNode<T, R>
where
    T: Send + 'static,
    R: 'static,
{
    /// Creates a merge node applying `op` to all inputs.
    pub fn new<F>(op: F) -> Self
    where
        F: Fn(&[T]) -> R + Send + Sync + 'static,
    {
        let inputs: Arc<Mutex<Vec<Arc<StateSink<T>>>>> = Arc::new(Mutex::new(Vec::new()));
        let pull = Arc::clone(&inputs);
        let out = StateSource::from_fallible(move || {
            let sinks = pull.lock();
            if sinks.is_empty() {
                return Err(FlowError::BadStructure(
                    "merge node has no connected inputs".to_string(),
                ));
            }
            let mut values = Vec::with_capacity(sinks.len());
            for sink in sinks.iter() {
                values.push(sink.get()?);
            }
            Ok(op(&values))
        });
        Self { inputs, out }
    }

    /// Allocates a fresh input sink. Every call adds one argument to the
    /// merge operation.
    pub fn input(&self) -> Arc<StateSink<T>> {
        let sink = Arc::new(StateSink::new());
        self.inputs.lock().push(Arc::clone(&sink));
        sink
    }

    /// State source carrying the merged value.
    pub fn out(&self) -> &StateSource<R> {
        &self.out
    }

    /// Pulls all inputs and applies the merge operation.
    pub fn get(&self) -> FlowResult<R> {
        self.out.get()
    }
}

/// Creates a merge node which applies `op` to all inputs and returns a
/// single state.
pub fn merge<T, R, F>(op: F) -> MergeNode<T, R>
where
    T: Send + 'static,
    R: 'static,
    F: Fn(&[T]) -> R + Send + Sync + 'static,
{
    MergeNode::new(op)
}

/// Merges inputs by collecting the incoming elements into a container.
///
/// `input` allocates a fresh state sink on every call; the output is the
/// vector of all current inputs in connection order.
pub struct DynamicMerger<T: 'static> {
    inputs: Arc<Mutex<Vec<Arc<StateSink<T>>>>>,
    out: StateSource<Vec<T>>,
}

impl<T> DynamicMerger<T>
where
    T: Send + 'static,
{
    /// Creates a merger with no inputs; its output starts empty.
    pub fn new() -> Self {
        let inputs: Arc<Mutex<Vec<Arc<StateSink<T>>>>> = Arc::new(Mutex::new(Vec::new()));
        let pull = Arc::clone(&inputs);
        let out = StateSource::from_fallible(move || {
            let sinks = pull.lock();
            let mut values = Vec::with_capacity(sinks.len());
            for sink in sinks.iter() {
                values.push(sink.get()?);
            }
            Ok(values)
        });
        Self { inputs, out }
    }

    /// Allocates a fresh input sink.
    pub fn input(&self) -> Arc<StateSink<T>> {
        let sink = Arc::new(StateSink::new());
        self.inputs.lock().push(Arc::clone(&sink));
        sink
    }

    /// State source carrying the collected inputs.
    pub fn out(&self) -> &StateSource<Vec<T>> {
        &self.out
    }

    /// Pulls all inputs into a container.
    pub fn get(&self) -> FlowResult<Vec<T>> {
        self.out.get()
    }
}

impl<T> Default for DynamicMerger<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a merger collecting all inputs into a `Vec`.
pub fn merge_all<T>() -> DynamicMerger<T>
where
    T: Send + 'static,
{
    DynamicMerger::new()
}

#[cfg(test)]
mod tests {
    use super::super::combinators::negate;
    use super::super::mux;
    use super::*;

    #[test]
    fn test_merge_applies_operation_to_all_inputs() {
        let multiply = merge(|values: &[i32]| values.iter().product::<i32>());
        let a = StateSource::new(|| 3);
        let b = StateSource::new(|| 2);

        mux(vec![&a, &b]) >> &multiply;

        assert_eq!(multiply.get().unwrap(), 6);
    }

    #[test]
    fn test_mux_lifts_transform_across_members() {
        let sum = merge(|values: &[i32]| values.iter().sum::<i32>());
        let a = StateSource::new(|| 1);
        let b = StateSource::new(|| 2);
        let c = StateSource::new(|| 3);

        mux(vec![&a, &b, &c]) >> negate() >> &sum;

        assert_eq!(sum.get().unwrap(), -6);
    }

    #[test]
    fn test_mux_pairs_state_ports_elementwise() {
        let a = StateSource::new(|| 1);
        let b = StateSource::new(|| 2);
        let x = StateSink::new();
        let y = StateSink::new();

        mux(vec![&a, &b]) >> mux(vec![&x, &y]);

        assert_eq!(x.get().unwrap(), 1);
        assert_eq!(y.get().unwrap(), 2);
    }

    #[test]
    #[should_panic(expected = "same number of subports")]
    fn test_mux_arity_mismatch_is_structural_error() {
        let a = StateSource::new(|| 1);
        let x = StateSink::new();
        let y = StateSink::new();
        mux(vec![&a]) >> mux(vec![&x, &y]);
    }

    #[test]
    fn test_unconnected_merge_input_reports_not_connected() {
        let sum = merge(|values: &[i32]| values.iter().sum::<i32>());
        let _unconnected = sum.input();
        assert!(matches!(sum.get(), Err(FlowError::NotConnected)));
    }

    #[test]
    fn test_empty_merge_is_a_structural_error() {
        let sum = merge(|values: &[i32]| values.iter().sum::<i32>());
        assert!(matches!(sum.get(), Err(FlowError::BadStructure(_))));
    }

    #[test]
    fn test_dynamic_merger_collects_inputs() {
        let merger = merge_all();
        let a = StateSource::new(|| 10);
        let b = StateSource::new(|| 20);

        let first = merger.input();
        let second = merger.input();
        &a >> first.as_ref();
        &b >> second.as_ref();

        assert_eq!(merger.get().unwrap(), vec![10, 20]);
    }
}
