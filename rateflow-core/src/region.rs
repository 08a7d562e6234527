//! Parallel regions and their tick controllers
//!
//! A region is a rate group: every node attached to it runs its work on the
//! region's work tick, and all buffers towards other regions advance their
//! generations on the region's switch tick. Different regions may run in
//! parallel on different workers; within one region, work executes as a
//! single task.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::EventSource;

/// Identifier of a parallel region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId {
    /// Stable string key of the region
    pub key: String,
}

impl RegionId {
    /// Creates an id from any string-like key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Interface to the cyclic ticks of a region.
pub struct TickController {
    switch: EventSource<()>,
    work: EventSource<()>,
}

impl TickController {
    fn new() -> Self {
        Self {
            switch: EventSource::new(),
            work: EventSource::new(),
        }
    }

    /// Sends a void event on the switch tick of the surrounding region.
    pub fn switch_tick(&self) -> &EventSource<()> {
        &self.switch
    }

    /// Sends a void event on the work tick of the surrounding region.
    /// Connect nodes that want to be triggered every cycle to this.
    pub fn work_tick(&self) -> &EventSource<()> {
        &self.work
    }

    /// Advances all buffers in the region by one generation.
    pub fn switch_buffers(&self) {
        self.switch.fire(());
    }

    /// Fires the work tick of the region.
    pub fn work(&self) {
        self.work.fire(());
    }
}

/// A single parallel region.
///
/// Provides switch ticks and work ticks for all nodes contained in the
/// region. Regions are compared by id; two regions with equal tick durations
/// belong to the same rate group.
pub struct ParallelRegion {
    id: RegionId,
    tick_duration: Duration,
    ticks: TickController,
}

impl ParallelRegion {
    /// Creates a region with the given id and tick duration.
    pub fn new(id: impl Into<String>, tick_duration: Duration) -> Self {
        Self {
            id: RegionId::new(id),
            tick_duration,
            ticks: TickController::new(),
        }
    }

    /// Identifier of this region.
    pub fn id(&self) -> &RegionId {
        &self.id
    }

    /// Tick duration of this region's rate group.
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// The region's tick controller.
    pub fn ticks(&self) -> &TickController {
        &self.ticks
    }

    /// Switch tick event source of this region.
    pub fn switch_tick(&self) -> &EventSource<()> {
        self.ticks.switch_tick()
    }

    /// Work tick event source of this region.
    pub fn work_tick(&self) -> &EventSource<()> {
        self.ticks.work_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_region_ids_compare_by_key() {
        let left = ParallelRegion::new("io", Duration::from_millis(10));
        let right = ParallelRegion::new("io", Duration::from_millis(10));
        assert_eq!(left.id(), right.id());
    }

    #[test]
    fn test_ticks_reach_connected_handlers() {
        let region = ParallelRegion::new("control", Duration::from_millis(10));
        let counts = Arc::new(Mutex::new((0usize, 0usize)));

        let on_switch = Arc::clone(&counts);
        region.switch_tick().connect(move |()| on_switch.lock().0 += 1);
        let on_work = Arc::clone(&counts);
        region.work_tick().connect(move |()| on_work.lock().1 += 1);

        region.ticks().switch_buffers();
        region.ticks().work();
        region.ticks().work();

        assert_eq!(*counts.lock(), (1, 2));
    }
}
