//! Settings boundary
//!
//! Provides access to values which can be configured by the embedding
//! program. A setting always holds a value satisfying its constraint; the
//! initial value is validated at construction. Region-bound settings apply
//! queued updates at the region's switch tick so that configuration changes
//! are phase-aligned with all other state of the region. Serialization of
//! settings from files is the concern of an external registry.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FlowError, FlowResult};
use crate::region::ParallelRegion;

/// Identifier of a setting in its registry, for example a key in a
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingId {
    /// Key of the setting
    pub key: String,
}

impl SettingId {
    /// Creates an id from any string-like key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Trivial constraint which accepts every value.
pub fn always_valid<T>(_: &T) -> bool {
    true
}

type Constraint<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A configured value with a validity constraint.
///
/// Reading never blocks on writers beyond the internal lock; the value seen
/// by `get` always satisfies the constraint.
pub struct Setting<T> {
    cache: Arc<Mutex<T>>,
}

impl<T> Setting<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a setting that never changes after construction.
    ///
    /// Fails with `ConstraintViolation` when the initial value does not
    /// satisfy `constraint`.
    pub fn constant<C>(id: SettingId, initial: T, constraint: C) -> FlowResult<Self>
    where
        C: Fn(&T) -> bool + Send + Sync + 'static,
    {
        if !constraint(&initial) {
            return Err(FlowError::ConstraintViolation { key: id.key });
        }
        Ok(Self {
            cache: Arc::new(Mutex::new(initial)),
        })
    }

    /// Creates a setting whose updates are applied at `region`'s switch
    /// tick.
    ///
    /// Returns the setting plus the setter handed to the registry. Values
    /// pushed through the setter are validated immediately but become
    /// visible to `get` only when the region switches, together with all
    /// other state published to the region.
    pub fn in_region<C>(
        id: SettingId,
        region: &Arc<ParallelRegion>,
        initial: T,
        constraint: C,
    ) -> FlowResult<(Self, SettingSetter<T>)>
    where
        C: Fn(&T) -> bool + Send + Sync + 'static,
    {
        if !constraint(&initial) {
            return Err(FlowError::ConstraintViolation { key: id.key });
        }
        let cache = Arc::new(Mutex::new(initial));
        let pending: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

        let apply_cache = Arc::clone(&cache);
        let apply_pending = Arc::clone(&pending);
        region.switch_tick().connect(move |()| {
            if let Some(value) = apply_pending.lock().take() {
                *apply_cache.lock() = value;
            }
        });

        let setter = SettingSetter {
            pending,
            constraint: Arc::new(constraint),
            key: id.key,
        };
        Ok((Self { cache }, setter))
    }

    /// The setting's current value.
    pub fn get(&self) -> T {
        self.cache.lock().clone()
    }
}

/// Write handle of a region-bound setting, used by the settings registry.
pub struct SettingSetter<T> {
    pending: Arc<Mutex<Option<T>>>,
    constraint: Constraint<T>,
    key: String,
}

impl<T> SettingSetter<T> {
    /// Queues a new value for the next switch tick.
    ///
    /// Fails with `ConstraintViolation` when the value is rejected; the
    /// setting and all other ports and tasks are unaffected in that case.
    pub fn set(&self, value: T) -> FlowResult<()> {
        if !(self.constraint)(&value) {
            return Err(FlowError::ConstraintViolation {
                key: self.key.clone(),
            });
        }
        *self.pending.lock() = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invalid_initial_value_is_rejected() {
        let result = Setting::constant(SettingId::new("gain"), -1, |value: &i32| *value >= 0);
        assert!(matches!(
            result,
            Err(FlowError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn test_constant_setting_returns_initial_value() {
        let setting = Setting::constant(SettingId::new("gain"), 3, always_valid).unwrap();
        assert_eq!(setting.get(), 3);
    }

    #[test]
    fn test_updates_apply_at_switch_tick() {
        let region = Arc::new(ParallelRegion::new("cfg", Duration::from_millis(10)));
        let (setting, setter) =
            Setting::in_region(SettingId::new("gain"), &region, 1, always_valid).unwrap();

        setter.set(5).unwrap();
        assert_eq!(setting.get(), 1);

        region.ticks().switch_buffers();
        assert_eq!(setting.get(), 5);
    }

    #[test]
    fn test_rejected_update_leaves_value_untouched() {
        let region = Arc::new(ParallelRegion::new("cfg", Duration::from_millis(10)));
        let (setting, setter) =
            Setting::in_region(SettingId::new("gain"), &region, 1, |value: &i32| *value >= 0)
                .unwrap();

        assert!(setter.set(-3).is_err());
        region.ticks().switch_buffers();

        assert_eq!(setting.get(), 1);
    }
}
