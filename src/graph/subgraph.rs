//! Node-type restricted projection of a graph view.

use crate::edges::NodeFilter;
use crate::error::Result;
use crate::graph::{GraphView, NodeId};
use crate::maps::TypeMap;

/// Read-only projection keeping only nodes whose type is in the whitelist.
///
/// Node ids are unchanged; excluded nodes simply stop existing: they are
/// dropped from every successor list and their own degree reads as the
/// degree of the filtered list. The view holds a mask and two references,
/// so cloning one per thread costs nothing.
pub struct Subgraph<'a, G> {
    graph: &'a G,
    types: &'a TypeMap,
    filter: NodeFilter,
}

impl<G> Clone for Subgraph<'_, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G> Copy for Subgraph<'_, G> {}

impl<'a, G: GraphView> Subgraph<'a, G> {
    pub fn new(graph: &'a G, types: &'a TypeMap, filter: NodeFilter) -> Subgraph<'a, G> {
        Subgraph {
            graph,
            types,
            filter,
        }
    }

    fn keeps(&self, node: NodeId) -> bool {
        self.types
            .get(node)
            .map(|t| self.filter.contains(t))
            .unwrap_or(false)
    }
}

impl<G: GraphView> GraphView for Subgraph<'_, G> {
    type Successors<'b>
        = SubgraphSuccessors<'b, G>
    where
        Self: 'b;

    fn num_nodes(&self) -> u64 {
        self.graph.num_nodes()
    }

    fn node_exists(&self, node: NodeId) -> bool {
        self.graph.node_exists(node) && self.keeps(node)
    }

    fn outdegree(&self, node: NodeId) -> Result<u64> {
        // The projected degree is not stored anywhere; count the survivors.
        let mut degree = 0;
        for succ in self.graph.successors(node)? {
            if self.keeps(succ) {
                degree += 1;
            }
        }
        Ok(degree)
    }

    fn successors(&self, node: NodeId) -> Result<SubgraphSuccessors<'_, G>> {
        Ok(SubgraphSuccessors {
            inner: self.graph.successors(node)?,
            types: self.types,
            filter: self.filter,
        })
    }
}

pub struct SubgraphSuccessors<'a, G: GraphView + 'a> {
    inner: G::Successors<'a>,
    types: &'a TypeMap,
    filter: NodeFilter,
}

impl<G: GraphView> Iterator for SubgraphSuccessors<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        for succ in self.inner.by_ref() {
            let keep = self
                .types
                .get(succ)
                .map(|t| self.filter.contains(t))
                .unwrap_or(false);
            if keep {
                return Some(succ);
            }
        }
        None
    }
}
