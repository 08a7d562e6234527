//! Application infrastructure
//!
//! The infrastructure object is what a program embedding the kernel
//! constructs: it owns the cycle control (and with it the master clock and
//! the worker pool), the abstract connection graph, and the root of the
//! node forest. Regions are minted through `add_region`, which wires each
//! region to the cycle control with a region-bound periodic task.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::FlowResult;
use crate::forest::{Forest, NodeBase};
use crate::graph::{ConnectionGraph, GraphObserver};
use crate::region::ParallelRegion;
use crate::scheduler::{CycleControl, ParallelScheduler, PeriodicTask, MEDIUM_TICK};

/// Owner of the cycle control, the connection graph and the node forest.
pub struct Infrastructure {
    cycle: CycleControl,
    graph: Arc<ConnectionGraph>,
    forest: Arc<Forest>,
    root_region: Arc<ParallelRegion>,
}

impl Infrastructure {
    /// Creates the infrastructure with a parallel scheduler, a root region
    /// at the medium tick and an empty forest below it.
    pub fn new() -> Self {
        let cycle = CycleControl::new(Arc::new(ParallelScheduler::new()));
        let graph = Arc::new(ConnectionGraph::new());

        let root_region = Self::mint_region(&cycle, "root_region", MEDIUM_TICK)
            .unwrap_or_else(|_| Arc::new(ParallelRegion::new("root_region", MEDIUM_TICK)));
        let forest = Forest::new(
            "root",
            Arc::clone(&root_region),
            Some(Arc::clone(&graph) as Arc<dyn GraphObserver>),
        );

        tracing::info!(region = %root_region.id(), "infrastructure created");
        Self {
            cycle,
            graph,
            forest,
            root_region,
        }
    }

    /// Mints a new rate group and schedules its ticks with the cycle
    /// control.
    ///
    /// Legal only while the scheduler is stopped; `tick_rate` must be one of
    /// the fast, medium and slow ticks.
    pub fn add_region(
        &self,
        name: impl Into<String>,
        tick_rate: Duration,
    ) -> FlowResult<Arc<ParallelRegion>> {
        Self::mint_region(&self.cycle, name, tick_rate)
    }

    fn mint_region(
        cycle: &CycleControl,
        name: impl Into<String>,
        tick_rate: Duration,
    ) -> FlowResult<Arc<ParallelRegion>> {
        let region = Arc::new(ParallelRegion::new(name, tick_rate));
        cycle.add_task(PeriodicTask::for_region(&region), tick_rate)?;
        tracing::debug!(region = %region.id(), tick = ?tick_rate, "region added");
        Ok(region)
    }

    /// Base of the root node; create all nodes below it.
    pub fn node_owner(&self) -> NodeBase {
        self.forest.root()
    }

    /// The forest owning all nodes.
    pub fn forest(&self) -> &Arc<Forest> {
        &self.forest
    }

    /// The abstract connection graph of the application.
    pub fn graph(&self) -> &Arc<ConnectionGraph> {
        &self.graph
    }

    /// The region the forest root is attached to.
    pub fn root_region(&self) -> &Arc<ParallelRegion> {
        &self.root_region
    }

    /// The cycle control driving all regions.
    pub fn cycle_control(&self) -> &CycleControl {
        &self.cycle
    }

    /// Starts the cycle control's main loop.
    pub fn start_scheduler(&self) -> FlowResult<()> {
        self.cycle.start()
    }

    /// Stops the cycle control and joins its threads.
    pub fn stop_scheduler(&self) -> FlowResult<()> {
        self.cycle.stop()
    }

    /// Sleeps for half a second, then surfaces the most recent task error,
    /// if any.
    pub fn iterate_main_loop(&self) -> FlowResult<()> {
        thread::sleep(Duration::from_millis(500));
        match self.cycle.last_exception() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Iterates the main loop until a task error surfaces.
    pub fn infinite_main_loop(&self) -> FlowResult<()> {
        loop {
            self.iterate_main_loop()?;
        }
    }
}

impl Default for Infrastructure {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Infrastructure {
    fn drop(&mut self) {
        let _ = self.cycle.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::scheduler::FAST_TICK;

    #[test]
    fn test_add_region_registers_a_periodic_task() {
        let infrastructure = Infrastructure::new();
        let region = infrastructure.add_region("sensors", FAST_TICK).unwrap();
        assert_eq!(region.tick_duration(), FAST_TICK);
    }

    #[test]
    fn test_add_region_rejects_unknown_rates() {
        let infrastructure = Infrastructure::new();
        let result = infrastructure.add_region("odd", Duration::from_millis(33));
        assert!(matches!(result, Err(FlowError::InvalidRate(_))));
    }

    #[test]
    fn test_node_owner_lives_in_root_region() {
        let infrastructure = Infrastructure::new();
        let owner = infrastructure.node_owner();
        assert_eq!(owner.region().id(), infrastructure.root_region().id());
    }

    #[test]
    fn test_ports_of_forest_nodes_are_recorded_in_graph() {
        let infrastructure = Infrastructure::new();
        let args = infrastructure.node_owner().new_node("probe").unwrap();
        let base = crate::forest::NodeBase::new(args);

        let _source = base.event_source::<i32>();
        let _sink = base.state_sink::<i32>();

        assert_eq!(infrastructure.graph().nr_of_ports(), 2);
    }
}
