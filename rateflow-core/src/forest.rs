//! Hierarchical node ownership
//!
//! The forest is an ordered tree that owns all nodes of an application.
//! Every node has a globally unique id, a human readable name and a unique
//! path (the `/`-joined chain of names from the root). Nodes are created
//! through a parent's `make_child` operations and carry a [`NodeBase`] that
//! knows the owning forest, the node's region and the graph observer.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};
use crate::graph::{GraphHandle, GraphNodeInfo, GraphObserver, GraphPortInfo};
use crate::ports::{EventSink, EventSource, StateSink, StateSource};
use crate::region::ParallelRegion;

/// Unique identifier of a node in the forest.
pub type NodeId = Uuid;

const NAME_SEPARATOR: &str = "/";

/// A node that can live in the forest.
pub trait TreeNode: Send + Sync + 'static {
    /// Name used by `make_child` when no explicit name is given.
    const DEFAULT_NAME: &'static str = "node";

    /// The node's base carrying identity, region and forest access.
    fn base(&self) -> &NodeBase;
}

/// Construction arguments handed to a node being inserted into the forest.
///
/// Obtained from a parent's `make_child`/`new_node`; embed the resulting
/// [`NodeBase`] in the node to mint region-aware ports.
pub struct NodeArgs {
    pub(crate) forest: Weak<Forest>,
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) region: Arc<ParallelRegion>,
    pub(crate) observer: Option<Arc<dyn GraphObserver>>,
}

/// Identity and factory base embedded in every node.
#[derive(Clone)]
pub struct NodeBase {
    forest: Weak<Forest>,
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    region: Arc<ParallelRegion>,
    observer: Option<Arc<dyn GraphObserver>>,
}

impl NodeBase {
    /// Builds the base from construction arguments.
    pub fn new(args: NodeArgs) -> Self {
        Self {
            forest: args.forest,
            id: args.id,
            name: args.name,
            parent: args.parent,
            region: args.region,
            observer: args.observer,
        }
    }

    /// Globally unique id of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Human readable name of this node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region this node belongs to.
    pub fn region(&self) -> &Arc<ParallelRegion> {
        &self.region
    }

    /// Metadata record of this node for the graph observer.
    pub fn graph_info(&self) -> GraphNodeInfo {
        GraphNodeInfo {
            id: self.id,
            name: self.name.clone(),
            parent: self.parent,
            region: Some(self.region.id().key.clone()),
        }
    }

    /// Full path of this node from the root, names joined by `/`.
    pub fn full_name(&self) -> FlowResult<String> {
        self.forest()?.full_name(self.id)
    }

    /// Creates a child node with the node type's default name.
    pub fn make_child<N, F>(&self, build: F) -> FlowResult<Arc<N>>
    where
        N: TreeNode,
        F: FnOnce(NodeArgs) -> N,
    {
        self.make_child_impl(None, N::DEFAULT_NAME.to_string(), build)
    }

    /// Creates a child node with an explicit name.
    pub fn make_child_named<N, F>(&self, name: impl Into<String>, build: F) -> FlowResult<Arc<N>>
    where
        N: TreeNode,
        F: FnOnce(NodeArgs) -> N,
    {
        self.make_child_impl(None, name.into(), build)
    }

    /// Creates a child node attached to `region` instead of the parent's.
    pub fn make_child_in<N, F>(&self, region: Arc<ParallelRegion>, build: F) -> FlowResult<Arc<N>>
    where
        N: TreeNode,
        F: FnOnce(NodeArgs) -> N,
    {
        self.make_child_impl(Some(region), N::DEFAULT_NAME.to_string(), build)
    }

    /// Creates a named child node attached to `region`.
    pub fn make_child_named_in<N, F>(
        &self,
        region: Arc<ParallelRegion>,
        name: impl Into<String>,
        build: F,
    ) -> FlowResult<Arc<N>>
    where
        N: TreeNode,
        F: FnOnce(NodeArgs) -> N,
    {
        self.make_child_impl(Some(region), name.into(), build)
    }

    /// Materializes a placeholder entry in the forest which serves as a
    /// proxy for a node. Use this to embed ports somewhere without
    /// constructing the node through the factory.
    pub fn new_node(&self, name: impl Into<String>) -> FlowResult<NodeArgs> {
        self.forest()?
            .new_entry(self.id, name.into(), Arc::clone(&self.region))
    }

    /// `new_node` with an explicit region for the proxy entry.
    pub fn new_node_in(
        &self,
        region: Arc<ParallelRegion>,
        name: impl Into<String>,
    ) -> FlowResult<NodeArgs> {
        self.forest()?.new_entry(self.id, name.into(), region)
    }

    /// Mints an event source attached to this node's region.
    pub fn event_source<T: 'static>(&self) -> EventSource<T> {
        let mut port = EventSource::new();
        port.region = Some(Arc::clone(&self.region));
        port.graph = self.graph_handle::<T>();
        port
    }

    /// Mints an event sink attached to this node's region.
    pub fn event_sink<T, F>(&self, handler: F) -> EventSink<T>
    where
        T: 'static,
        F: FnMut(T) + Send + 'static,
    {
        let mut port = EventSink::new(handler);
        port.region = Some(Arc::clone(&self.region));
        port.graph = self.graph_handle::<T>();
        port
    }

    /// Mints a state source attached to this node's region.
    pub fn state_source<T, F>(&self, producer: F) -> StateSource<T>
    where
        T: 'static,
        F: FnMut() -> T + Send + 'static,
    {
        let mut port = StateSource::new(producer);
        port.region = Some(Arc::clone(&self.region));
        port.graph = self.graph_handle::<T>();
        port
    }

    /// Mints a state sink attached to this node's region.
    pub fn state_sink<T: 'static>(&self) -> StateSink<T> {
        let mut port = StateSink::new();
        port.region = Some(Arc::clone(&self.region));
        port.graph = self.graph_handle::<T>();
        port
    }

    fn graph_handle<T>(&self) -> Option<GraphHandle> {
        self.observer.as_ref().map(|observer| {
            let port = GraphPortInfo::for_token::<T>(self.id);
            observer.add_port(&self.graph_info(), &port);
            GraphHandle {
                observer: Arc::clone(observer),
                port,
            }
        })
    }

    fn make_child_impl<N, F>(
        &self,
        region: Option<Arc<ParallelRegion>>,
        name: String,
        build: F,
    ) -> FlowResult<Arc<N>>
    where
        N: TreeNode,
        F: FnOnce(NodeArgs) -> N,
    {
        self.forest()?.insert_child(self.id, name, region, build)
    }

    fn forest(&self) -> FlowResult<Arc<Forest>> {
        self.forest
            .upgrade()
            .ok_or_else(|| FlowError::BadStructure("the owning forest no longer exists".to_string()))
    }
}

struct Entry {
    name: String,
    region: Arc<ParallelRegion>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Owned node, `None` for placeholder entries created by `new_node`.
    node: Option<Arc<dyn Any + Send + Sync>>,
}

struct ForestInner {
    entries: HashMap<NodeId, Entry>,
    root: NodeId,
}

/// Ordered tree owning the nodes of an application.
pub struct Forest {
    inner: Mutex<ForestInner>,
    weak: Weak<Forest>,
    observer: Option<Arc<dyn GraphObserver>>,
}

impl Forest {
    /// Creates a forest with a root entry in `root_region`.
    pub fn new(
        root_name: impl Into<String>,
        root_region: Arc<ParallelRegion>,
        observer: Option<Arc<dyn GraphObserver>>,
    ) -> Arc<Self> {
        let root_name = root_name.into();
        Arc::new_cyclic(|weak| {
            let root_id = Uuid::new_v4();
            let mut entries = HashMap::new();
            entries.insert(
                root_id,
                Entry {
                    name: root_name,
                    region: root_region,
                    parent: None,
                    children: Vec::new(),
                    node: None,
                },
            );
            Forest {
                inner: Mutex::new(ForestInner {
                    entries,
                    root: root_id,
                }),
                weak: weak.clone(),
                observer,
            }
        })
    }

    /// Base of the distinguished root node; all other nodes are created
    /// below it.
    pub fn root(&self) -> NodeBase {
        let inner = self.inner.lock();
        let root = inner
            .entries
            .get(&inner.root)
            .expect("forest invariant: root entry always exists");
        NodeBase {
            forest: self.weak.clone(),
            id: inner.root,
            name: root.name.clone(),
            parent: None,
            region: Arc::clone(&root.region),
            observer: self.observer.clone(),
        }
    }

    /// Id of the root node.
    pub fn root_id(&self) -> NodeId {
        self.inner.lock().root
    }

    /// Number of entries in the forest, including placeholders.
    pub fn nr_of_nodes(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Child ids of `id` in insertion order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .entries
            .get(&id)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    /// Parent id of `id`, `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.inner.lock().entries.get(&id).and_then(|entry| entry.parent)
    }

    /// Owned node stored at `id`; `None` for placeholder entries.
    pub fn node(&self, id: NodeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner
            .lock()
            .entries
            .get(&id)
            .and_then(|entry| entry.node.clone())
    }

    /// Name of the entry `id`.
    pub fn name(&self, id: NodeId) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(&id)
            .map(|entry| entry.name.clone())
    }

    /// Full name of node `id`: the chained names of its parents and the
    /// node's own name, separated by `/`.
    pub fn full_name(&self, id: NodeId) -> FlowResult<String> {
        let inner = self.inner.lock();
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let entry = inner
                .entries
                .get(&current)
                .ok_or_else(|| FlowError::BadStructure("node is not part of the forest".to_string()))?;
            names.push(entry.name.clone());
            cursor = entry.parent;
        }
        names.reverse();
        Ok(names.join(NAME_SEPARATOR))
    }

    /// Erases node `id` and recursively all of its children.
    ///
    /// Dropping the owned nodes severs all port connections they held.
    pub fn erase_with_subtree(&self, id: NodeId) -> FlowResult<()> {
        let mut inner = self.inner.lock();
        if id == inner.root {
            return Err(FlowError::BadStructure(
                "the root node cannot be erased".to_string(),
            ));
        }
        if !inner.entries.contains_key(&id) {
            return Err(FlowError::BadStructure(
                "node is not part of the forest".to_string(),
            ));
        }

        let mut doomed = vec![id];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(entry) = inner.entries.get(&current) {
                for child in &entry.children {
                    doomed.push(*child);
                    stack.push(*child);
                }
            }
        }

        let parent = inner.entries.get(&id).and_then(|entry| entry.parent);
        if let Some(parent) = parent {
            if let Some(entry) = inner.entries.get_mut(&parent) {
                entry.children.retain(|child| *child != id);
            }
        }
        for node in doomed {
            inner.entries.remove(&node);
        }
        Ok(())
    }

    pub(crate) fn new_entry(
        &self,
        parent: NodeId,
        name: String,
        region: Arc<ParallelRegion>,
    ) -> FlowResult<NodeArgs> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&parent) {
            return Err(FlowError::BadStructure(
                "parent node is not part of the forest".to_string(),
            ));
        }
        let id = Uuid::new_v4();
        inner.entries.insert(
            id,
            Entry {
                name: name.clone(),
                region: Arc::clone(&region),
                parent: Some(parent),
                children: Vec::new(),
                node: None,
            },
        );
        if let Some(entry) = inner.entries.get_mut(&parent) {
            entry.children.push(id);
        }
        Ok(NodeArgs {
            forest: self.weak.clone(),
            id,
            name,
            parent: Some(parent),
            region,
            observer: self.observer.clone(),
        })
    }

    pub(crate) fn insert_child<N, F>(
        &self,
        parent: NodeId,
        name: String,
        region: Option<Arc<ParallelRegion>>,
        build: F,
    ) -> FlowResult<Arc<N>>
    where
        N: TreeNode,
        F: FnOnce(NodeArgs) -> N,
    {
        let region = match region {
            Some(region) => region,
            None => {
                let inner = self.inner.lock();
                let entry = inner.entries.get(&parent).ok_or_else(|| {
                    FlowError::BadStructure("parent node is not part of the forest".to_string())
                })?;
                Arc::clone(&entry.region)
            }
        };
        let args = self.new_entry(parent, name, region)?;
        let id = args.id;

        // The factory runs outside the forest lock so nodes may create
        // children of their own during construction.
        let node = Arc::new(build(args));

        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&id) {
            entry.node = Some(Arc::clone(&node) as Arc<dyn Any + Send + Sync>);
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct PlainNode {
        base: NodeBase,
    }

    impl PlainNode {
        fn new(args: NodeArgs) -> Self {
            Self {
                base: NodeBase::new(args),
            }
        }
    }

    impl TreeNode for PlainNode {
        const DEFAULT_NAME: &'static str = "plain";

        fn base(&self) -> &NodeBase {
            &self.base
        }
    }

    fn fast_region(name: &str) -> Arc<ParallelRegion> {
        Arc::new(ParallelRegion::new(name, Duration::from_millis(10)))
    }

    #[test]
    fn test_children_inherit_parent_region_by_default() {
        let region = fast_region("root");
        let forest = Forest::new("root", Arc::clone(&region), None);

        let child = forest.root().make_child(PlainNode::new).unwrap();

        assert_eq!(child.base().region().id(), region.id());
    }

    #[test]
    fn test_region_can_be_overridden_at_construction() {
        let forest = Forest::new("root", fast_region("root"), None);
        let other = fast_region("other");

        let child = forest
            .root()
            .make_child_in(Arc::clone(&other), PlainNode::new)
            .unwrap();

        assert_eq!(child.base().region().id(), other.id());
    }

    #[test]
    fn test_full_name_joins_path_with_separator() {
        let forest = Forest::new("root", fast_region("root"), None);
        let child = forest
            .root()
            .make_child_named("child", PlainNode::new)
            .unwrap();
        let grandchild = child
            .base()
            .make_child_named("leaf", PlainNode::new)
            .unwrap();

        assert_eq!(grandchild.base().full_name().unwrap(), "root/child/leaf");
    }

    #[test]
    fn test_erase_with_subtree_removes_all_descendants() {
        let forest = Forest::new("root", fast_region("root"), None);
        let child = forest
            .root()
            .make_child_named("child", PlainNode::new)
            .unwrap();
        child
            .base()
            .make_child_named("leaf", PlainNode::new)
            .unwrap();
        assert_eq!(forest.nr_of_nodes(), 3);

        forest.erase_with_subtree(child.base().id()).unwrap();

        assert_eq!(forest.nr_of_nodes(), 1);
        assert!(forest.children(forest.root_id()).is_empty());
    }

    #[test]
    fn test_root_cannot_be_erased() {
        let forest = Forest::new("root", fast_region("root"), None);
        assert!(matches!(
            forest.erase_with_subtree(forest.root_id()),
            Err(FlowError::BadStructure(_))
        ));
    }

    #[test]
    fn test_new_node_materializes_placeholder_entry() {
        let forest = Forest::new("root", fast_region("root"), None);
        let args = forest.root().new_node("proxy").unwrap();
        let base = NodeBase::new(args);

        assert_eq!(forest.nr_of_nodes(), 2);
        assert_eq!(base.full_name().unwrap(), "root/proxy");
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let forest = Forest::new("root", fast_region("root"), None);
        let root = forest.root();
        let first = root.make_child_named("a", PlainNode::new).unwrap();
        let second = root.make_child_named("b", PlainNode::new).unwrap();

        assert_eq!(
            forest.children(forest.root_id()),
            vec![first.base().id(), second.base().id()]
        );
    }
}
