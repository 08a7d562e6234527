//! Abstract connection graph observer
//!
//! Ports created through nodes announce themselves and their connections to
//! a [`GraphObserver`], so external tooling can inspect the dataflow graph.
//! The default recorder, [`ConnectionGraph`], keeps the structure in a
//! directed graph; output encodings (graphviz, JSON) are the concern of the
//! embedding program. Absence of an observer does not alter runtime
//! behavior.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use uuid::Uuid;

/// Information carried by a node of the dataflow graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeInfo {
    /// Globally unique id of the node
    pub id: Uuid,
    /// Human readable name
    pub name: String,
    /// Id of the parent node, `None` for the root
    pub parent: Option<Uuid>,
    /// Key of the region the node belongs to
    pub region: Option<String>,
}

/// Information carried by a port taking part in the dataflow graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphPortInfo {
    /// Globally unique id of the port
    pub id: Uuid,
    /// Id of the node owning the port
    pub node: Uuid,
    /// Token type flowing through the port
    pub description: String,
}

impl GraphPortInfo {
    /// Creates port information for a port of token type `T` owned by `node`.
    pub fn for_token<T>(node: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            node,
            description: std::any::type_name::<T>().to_string(),
        }
    }
}

/// Observer notified when node-aware ports are created and connected.
pub trait GraphObserver: Send + Sync {
    /// A node-aware port was instantiated.
    fn add_port(&self, node: &GraphNodeInfo, port: &GraphPortInfo);
    /// Two node-aware ports were connected.
    fn add_connection(&self, source: &GraphPortInfo, sink: &GraphPortInfo);
}

/// Observer handle carried by node-aware ports.
#[derive(Clone)]
pub(crate) struct GraphHandle {
    pub(crate) observer: Arc<dyn GraphObserver>,
    pub(crate) port: GraphPortInfo,
}

struct GraphInner {
    graph: DiGraph<GraphPortInfo, ()>,
    port_index: HashMap<Uuid, NodeIndex>,
    nodes: HashMap<Uuid, GraphNodeInfo>,
}

/// The abstract connection graph of a dataflow application.
///
/// Contains all declared node-aware ports and the edges between them.
pub struct ConnectionGraph {
    inner: Mutex<GraphInner>,
}

impl ConnectionGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GraphInner {
                graph: DiGraph::new(),
                port_index: HashMap::new(),
                nodes: HashMap::new(),
            }),
        }
    }

    /// Number of ports declared so far.
    pub fn nr_of_ports(&self) -> usize {
        self.inner.lock().graph.node_count()
    }

    /// Number of recorded connections.
    pub fn nr_of_connections(&self) -> usize {
        self.inner.lock().graph.edge_count()
    }

    /// All declared nodes.
    pub fn nodes(&self) -> Vec<GraphNodeInfo> {
        self.inner.lock().nodes.values().cloned().collect()
    }

    /// All declared ports.
    pub fn ports(&self) -> Vec<GraphPortInfo> {
        let inner = self.inner.lock();
        inner.graph.node_weights().cloned().collect()
    }

    /// All recorded connections as (source port, sink port) pairs.
    pub fn connections(&self) -> Vec<(GraphPortInfo, GraphPortInfo)> {
        let inner = self.inner.lock();
        inner
            .graph
            .edge_indices()
            .filter_map(|edge| inner.graph.edge_endpoints(edge))
            .map(|(source, sink)| {
                (
                    inner.graph[source].clone(),
                    inner.graph[sink].clone(),
                )
            })
            .collect()
    }

    /// Deletes the current graph.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.graph.clear();
        inner.port_index.clear();
        inner.nodes.clear();
    }

    fn index_of(inner: &mut GraphInner, port: &GraphPortInfo) -> NodeIndex {
        if let Some(index) = inner.port_index.get(&port.id) {
            return *index;
        }
        let index = inner.graph.add_node(port.clone());
        inner.port_index.insert(port.id, index);
        index
    }
}

impl Default for ConnectionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphObserver for ConnectionGraph {
    fn add_port(&self, node: &GraphNodeInfo, port: &GraphPortInfo) {
        let mut inner = self.inner.lock();
        inner.nodes.entry(node.id).or_insert_with(|| node.clone());
        Self::index_of(&mut inner, port);
    }

    fn add_connection(&self, source: &GraphPortInfo, sink: &GraphPortInfo) {
        let mut inner = self.inner.lock();
        let source_index = Self::index_of(&mut inner, source);
        let sink_index = Self::index_of(&mut inner, sink);
        inner.graph.add_edge(source_index, sink_index, ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(node: Uuid) -> GraphPortInfo {
        GraphPortInfo::for_token::<i32>(node)
    }

    #[test]
    fn test_ports_are_recorded_once() {
        let graph = ConnectionGraph::new();
        let node = GraphNodeInfo {
            id: Uuid::new_v4(),
            name: "sensor".to_string(),
            parent: None,
            region: Some("fast".to_string()),
        };
        let out_port = port(node.id);

        graph.add_port(&node, &out_port);
        graph.add_port(&node, &out_port);

        assert_eq!(graph.nr_of_ports(), 1);
        assert_eq!(graph.nodes().len(), 1);
    }

    #[test]
    fn test_connections_record_edges() {
        let graph = ConnectionGraph::new();
        let node = Uuid::new_v4();
        let source = port(node);
        let sink = port(node);

        graph.add_connection(&source, &sink);

        assert_eq!(graph.nr_of_ports(), 2);
        assert_eq!(graph.nr_of_connections(), 1);
        let edges = graph.connections();
        assert_eq!(edges[0].0.id, source.id);
        assert_eq!(edges[0].1.id, sink.id);
    }

    #[test]
    fn test_clear_resets_graph() {
        let graph = ConnectionGraph::new();
        let node = Uuid::new_v4();
        graph.add_connection(&port(node), &port(node));

        graph.clear();

        assert_eq!(graph.nr_of_ports(), 0);
        assert_eq!(graph.nr_of_connections(), 0);
    }
}
