//! Named connectables for use inside chains
//!
//! A collection of small transforms to make chain code less verbose, plus
//! [`lambda`] for ad-hoc closures and [`constant`] as a producer for state
//! chains.

use std::ops::{Add, Div, Mul, Neg, Not, Sub};

use super::chain::{EndpointMeta, StateChain, Transform};

/// Wraps a closure as a chain transform.
pub fn lambda<I, O, F>(f: F) -> Transform<I, O>
where
    F: Fn(I) -> O + Send + Sync + 'static,
{
    Transform::from_fn(f)
}

/// Returns input unchanged.
pub fn identity<T: 'static>() -> Transform<T, T> {
    Transform::from_fn(|input| input)
}

/// Adds a constant addend to inputs.
pub fn add<T>(addend: T) -> Transform<T, T>
where
    T: Add<Output = T> + Clone + Send + Sync + 'static,
{
    Transform::from_fn(move |input: T| input + addend.clone())
}

/// Subtracts a constant subtrahend from inputs.
pub fn subtract<T>(subtrahend: T) -> Transform<T, T>
where
    T: Sub<Output = T> + Clone + Send + Sync + 'static,
{
    Transform::from_fn(move |input: T| input - subtrahend.clone())
}

/// Multiplies input by a constant factor (aka gain).
pub fn multiply<T>(factor: T) -> Transform<T, T>
where
    T: Mul<Output = T> + Clone + Send + Sync + 'static,
{
    Transform::from_fn(move |input: T| input * factor.clone())
}

/// Divides inputs by a constant divisor.
pub fn divide<T>(divisor: T) -> Transform<T, T>
where
    T: Div<Output = T> + Clone + Send + Sync + 'static,
{
    Transform::from_fn(move |input: T| input / divisor.clone())
}

/// Negates input using unary minus.
pub fn negate<T>() -> Transform<T, T>
where
    T: Neg<Output = T> + 'static,
{
    Transform::from_fn(|input: T| -input)
}

/// Returns the logical (or bitwise) complement of input.
pub fn not<T>() -> Transform<T, T>
where
    T: Not<Output = T> + 'static,
{
    Transform::from_fn(|input: T| !input)
}

/// Clamps input to the closed range `[min, max]`.
pub fn clamp<T>(min: T, max: T) -> Transform<T, T>
where
    T: PartialOrd + Clone + Send + Sync + 'static,
{
    assert!(min <= max, "clamp requires min <= max");
    Transform::from_fn(move |input: T| {
        if input < min {
            min.clone()
        } else if max < input {
            max.clone()
        } else {
            input
        }
    })
}

/// State producer which returns the given value every time it is pulled.
pub fn constant<T>(value: T) -> StateChain<T>
where
    T: Clone + Send + 'static,
{
    StateChain::from_parts(Box::new(move || Ok(value.clone())), EndpointMeta::detached())
}

/// Calls `observer` with a reference to every token and forwards it
/// unchanged. Useful to observe tokens mid-chain.
pub fn tee<T, F>(observer: F) -> Transform<T, T>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Transform::from_fn(move |input: T| {
        observer(&input);
        input
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{EventSink, EventSource, StateSink};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_arithmetic_combinators() {
        assert_eq!(add(5).call(2), 7);
        assert_eq!(subtract(5).call(2), -3);
        assert_eq!(multiply(3).call(4), 12);
        assert_eq!(divide(2).call(10), 5);
        assert_eq!(negate().call(3), -3);
        assert_eq!(not().call(false), true);
        assert_eq!(identity().call(9), 9);
    }

    #[test]
    fn test_clamp_bounds() {
        let bounded = clamp(0, 10);
        assert_eq!(bounded.call(-5), 0);
        assert_eq!(bounded.call(5), 5);
        assert_eq!(bounded.call(15), 10);
    }

    #[test]
    fn test_constant_feeds_state_sink() {
        let sink = StateSink::new();
        constant(13) >> &sink;
        assert_eq!(sink.get().unwrap(), 13);
    }

    #[test]
    fn test_tee_observes_without_changing_tokens() {
        let source = EventSource::<i32>::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let copy = Arc::clone(&observed);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        let sink = EventSink::new(move |event| store.lock().push(event));

        &source >> tee(move |event: &i32| copy.lock().push(*event)) >> &sink;
        source.fire(11);

        assert_eq!(*observed.lock(), vec![11]);
        assert_eq!(*seen.lock(), vec![11]);
    }
}
