//! Virtual and wall clocks
//!
//! The virtual clocks decouple schedule time from wall time: all timings
//! inside the dataflow graph are expressed in virtual time, which is advanced
//! exclusively by the master clock owned by the cycle control. This makes
//! simulations and replays of logged data independent of the system clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall clock for measurements of system time.
///
/// Timings inside the dataflow graph should pretty much always use the
/// virtual clock instead.
pub struct WallClock;

impl WallClock {
    /// Current wall steady time, forwards to [`Instant::now`].
    pub fn steady_now() -> Instant {
        Instant::now()
    }

    /// Current wall system time, forwards to [`SystemTime::now`].
    pub fn system_now() -> SystemTime {
        SystemTime::now()
    }
}

/// Virtual clock pair controlling the time within a dataflow application.
///
/// The steady clock measures time differences in simulation time and only
/// ever moves forward. The system clock measures absolute simulation time
/// and may be set by a replay. Both are advanced by the [`MasterClock`];
/// reads never block.
#[derive(Debug)]
pub struct VirtualClock {
    /// Nanoseconds of virtual steady time since the start of the application
    steady_ns: AtomicU64,
    /// Nanoseconds of virtual system time since the unix epoch
    system_ns: AtomicU64,
}

impl VirtualClock {
    /// Creates a clock at steady epoch zero with the system clock seeded
    /// from the current wall time.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            steady_ns: AtomicU64::new(0),
            system_ns: AtomicU64::new(seed.as_nanos() as u64),
        }
    }

    /// Current relative simulation time.
    ///
    /// If `steady_now` is called twice with results t1 and t2, t2 >= t1 holds.
    pub fn steady_now(&self) -> Duration {
        Duration::from_nanos(self.steady_ns.load(Ordering::Acquire))
    }

    /// Current absolute simulation time.
    pub fn system_now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn advance(&self, step: Duration) {
        let ns = step.as_nanos() as u64;
        self.steady_ns.fetch_add(ns, Ordering::AcqRel);
        self.system_ns.fetch_add(ns, Ordering::AcqRel);
    }

    fn set_system_time(&self, at: SystemTime) {
        let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        self.system_ns
            .store(since_epoch.as_nanos() as u64, Ordering::Release);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Controls the time of the two virtual clocks.
///
/// The scheduler calls [`MasterClock::advance`] during runtime to move
/// virtual time forward by a single tick, the smallest duration possible.
pub struct MasterClock {
    tick: Duration,
    clock: Arc<VirtualClock>,
}

impl MasterClock {
    /// Creates a master clock advancing by `tick` per step.
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            clock: Arc::new(VirtualClock::new()),
        }
    }

    /// Advances both virtual clocks by a single tick.
    pub fn advance(&self) {
        self.clock.advance(self.tick);
    }

    /// Sets the absolute time of the virtual system clock.
    ///
    /// The steady clock is not touched, as it has only relative timings.
    pub fn set_system_time(&self, at: SystemTime) {
        self.clock.set_system_time(at);
    }

    /// Shared handle to the virtual clocks driven by this master.
    pub fn virtual_clock(&self) -> Arc<VirtualClock> {
        Arc::clone(&self.clock)
    }

    /// The smallest duration this clock can advance by.
    pub fn tick(&self) -> Duration {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_both_clocks() {
        let master = MasterClock::new(Duration::from_millis(10));
        let clock = master.virtual_clock();
        let system_before = clock.system_now();

        master.advance();
        master.advance();

        assert_eq!(clock.steady_now(), Duration::from_millis(20));
        assert_eq!(
            clock.system_now().duration_since(system_before).unwrap(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_steady_clock_is_monotonic() {
        let master = MasterClock::new(Duration::from_millis(10));
        let clock = master.virtual_clock();
        let t1 = clock.steady_now();
        master.advance();
        let t2 = clock.steady_now();
        assert!(t2 >= t1);
    }

    #[test]
    fn test_set_system_time_leaves_steady_untouched() {
        let master = MasterClock::new(Duration::from_millis(10));
        let clock = master.virtual_clock();
        master.advance();

        let replay_start = UNIX_EPOCH + Duration::from_secs(42);
        master.set_system_time(replay_start);

        assert_eq!(clock.system_now(), replay_start);
        assert_eq!(clock.steady_now(), Duration::from_millis(10));
    }
}
