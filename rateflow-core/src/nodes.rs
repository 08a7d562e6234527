//! Nodes tying work to region ticks

use crate::forest::{NodeArgs, NodeBase, TreeNode};

/// Node whose action runs on every work tick of its region.
///
/// The canonical way for a node to produce work every cycle: the action is
/// registered with the region's work tick at construction and runs as part
/// of the region's periodic task.
pub struct RegionWorkerNode {
    base: NodeBase,
}

impl RegionWorkerNode {
    /// Creates the node and wires `action` to the region's work tick.
    pub fn new<F>(action: F, args: NodeArgs) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let base = NodeBase::new(args);
        let mut action = action;
        base.region().work_tick().connect(move |()| action());
        Self { base }
    }
}

impl TreeNode for RegionWorkerNode {
    const DEFAULT_NAME: &'static str = "worker";

    fn base(&self) -> &NodeBase {
        &self.base
    }
}
