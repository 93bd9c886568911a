//! Runtime graph store.
//!
//! A [`GraphStore`] owns the forward and transposed compressed graphs, the
//! identifier index, the node-type table, and the optional property columns,
//! all opened read-only over memory maps. Cloning a store is a lightweight
//! duplicate: the clone shares every buffer and owns nothing mutable, so one
//! store can be handed to any number of threads.

pub mod bvgraph;
mod subgraph;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::maps::{NodeIdMap, TypeMap, NODE_TO_TYPE_EXT};
use crate::pid::{NodeType, Pid};
use crate::properties::Properties;
use crate::util::suffix_path;

pub use bvgraph::{BvGraph, BvGraphWriter, Successors};
pub use subgraph::{Subgraph, SubgraphSuccessors};

/// Internal node id: the BFS ordinal of a node, stable only for a given
/// compressed-graph artifact.
pub type NodeId = u64;

/// Capability set shared by the concrete graph, its transpose, and the
/// subgraph view. Every view is cheap to clone for per-thread use.
pub trait GraphView: Clone {
    type Successors<'a>: Iterator<Item = NodeId>
    where
        Self: 'a;

    fn num_nodes(&self) -> u64;

    fn node_exists(&self, node: NodeId) -> bool {
        node < self.num_nodes()
    }

    fn outdegree(&self, node: NodeId) -> Result<u64>;

    fn successors(&self, node: NodeId) -> Result<Self::Successors<'_>>;
}

impl GraphView for BvGraph {
    type Successors<'a> = bvgraph::Successors<'a>;

    fn num_nodes(&self) -> u64 {
        BvGraph::num_nodes(self)
    }

    fn outdegree(&self, node: NodeId) -> Result<u64> {
        BvGraph::outdegree(self, node)
    }

    fn successors(&self, node: NodeId) -> Result<Successors<'_>> {
        BvGraph::successors(self, node)
    }
}

/// The complete read-only store over one compressed-graph basename.
#[derive(Clone)]
pub struct GraphStore {
    path: PathBuf,
    forward: BvGraph,
    backward: BvGraph,
    node_map: Arc<NodeIdMap>,
    types: Arc<TypeMap>,
    properties: Arc<Properties>,
}

impl GraphStore {
    /// Opens every required artifact under `base` and cross-checks their
    /// declared node counts. Property columns stay unloaded; see
    /// [`GraphStore::load_all_properties`].
    pub fn open(base: &Path) -> Result<GraphStore> {
        let forward = BvGraph::load(base)?;
        let backward = BvGraph::load(&suffix_path(base, "-transposed"))?;
        if backward.num_nodes() != forward.num_nodes() {
            return Err(GraphError::ArtifactCorrupt(format!(
                "transposed graph has {} nodes, forward has {}",
                backward.num_nodes(),
                forward.num_nodes()
            )));
        }
        if backward.num_arcs() != forward.num_arcs() {
            return Err(GraphError::ArtifactCorrupt(format!(
                "transposed graph has {} arcs, forward has {}",
                backward.num_arcs(),
                forward.num_arcs()
            )));
        }
        let num_nodes = forward.num_nodes();
        let node_map = NodeIdMap::load(base, num_nodes)?;
        let types = TypeMap::load(&suffix_path(base, NODE_TO_TYPE_EXT))?;
        if types.num_nodes() != num_nodes {
            return Err(GraphError::ArtifactCorrupt(format!(
                "type table covers {} nodes, graph has {num_nodes}",
                types.num_nodes()
            )));
        }
        debug!(
            path = %base.display(),
            nodes = num_nodes,
            arcs = forward.num_arcs(),
            "graph.store.open"
        );
        Ok(GraphStore {
            path: base.to_path_buf(),
            forward,
            backward,
            node_map: Arc::new(node_map),
            types: Arc::new(types),
            properties: Arc::new(Properties::new(base, num_nodes)),
        })
    }

    /// Loads every property column present next to the graph.
    pub fn load_all_properties(&mut self) -> Result<()> {
        let mut properties = Properties::new(&self.path, self.num_nodes());
        properties.load_all()?;
        self.properties = Arc::new(properties);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_nodes(&self) -> u64 {
        self.forward.num_nodes()
    }

    pub fn num_arcs(&self) -> u64 {
        self.forward.num_arcs()
    }

    /// The forward (src -> dst) view.
    pub fn forward(&self) -> &BvGraph {
        &self.forward
    }

    /// The transposed (dst -> src) view.
    pub fn backward(&self) -> &BvGraph {
        &self.backward
    }

    pub fn node_id(&self, pid: &Pid) -> Result<NodeId> {
        self.node_map.node_id(pid)
    }

    pub fn pid(&self, node: NodeId) -> Result<Pid> {
        self.node_map.pid(node)
    }

    pub fn node_type(&self, node: NodeId) -> Result<NodeType> {
        self.types.get(node)
    }

    /// Outdegree in the forward graph, indegree when `transposed`.
    pub fn degree(&self, node: NodeId, transposed: bool) -> Result<u64> {
        if transposed {
            self.backward.outdegree(node)
        } else {
            self.forward.outdegree(node)
        }
    }

    /// Successors in the forward graph, predecessors when `transposed`.
    pub fn neighbors(&self, node: NodeId, transposed: bool) -> Result<Successors<'_>> {
        if transposed {
            self.backward.successors(node)
        } else {
            self.forward.successors(node)
        }
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Restricts a direction of this store to the given node-type whitelist.
    pub fn subgraph(&self, transposed: bool, filter: crate::edges::NodeFilter) -> Subgraph<'_, BvGraph> {
        let graph = if transposed {
            &self.backward
        } else {
            &self.forward
        };
        Subgraph::new(graph, &self.types, filter)
    }
}
