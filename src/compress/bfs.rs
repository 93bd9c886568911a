//! BFS renumbering of the hash-ordered graph.
//!
//! The permutation is computed over the symmetrized graph so that every
//! weakly connected component is renumbered contiguously, which is what
//! makes the gap-coded adjacency lists small. Symmetrization never
//! materializes a third graph: a node's neighborhood is the deduplicating
//! merge of its forward and transposed successor streams.

use std::collections::VecDeque;

use tracing::debug;

use crate::bits::Bitmap;
use crate::error::Result;
use crate::graph::{BvGraph, NodeId};

/// Merges two increasing id streams, deduplicating on equality.
pub(crate) struct UnionSuccessors<A: Iterator, B: Iterator> {
    left: std::iter::Peekable<A>,
    right: std::iter::Peekable<B>,
}

impl<A, B> UnionSuccessors<A, B>
where
    A: Iterator<Item = NodeId>,
    B: Iterator<Item = NodeId>,
{
    pub(crate) fn new(left: A, right: B) -> UnionSuccessors<A, B> {
        UnionSuccessors {
            left: left.peekable(),
            right: right.peekable(),
        }
    }
}

impl<A, B> Iterator for UnionSuccessors<A, B>
where
    A: Iterator<Item = NodeId>,
    B: Iterator<Item = NodeId>,
{
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        match (self.left.peek(), self.right.peek()) {
            (None, None) => None,
            (Some(_), None) => self.left.next(),
            (None, Some(_)) => self.right.next(),
            (Some(&l), Some(&r)) => {
                if l < r {
                    self.left.next()
                } else if r < l {
                    self.right.next()
                } else {
                    self.left.next();
                    self.right.next()
                }
            }
        }
    }
}

/// Computes `order[hash_ordinal] = bfs_ordinal` over the symmetrized graph.
///
/// The sweep starts at node 0 and restarts from the smallest unvisited
/// ordinal, so nodes unreached from earlier roots follow in increasing hash
/// order and the permutation is total.
pub(crate) fn bfs_order(forward: &BvGraph, transposed: &BvGraph) -> Result<Vec<u64>> {
    let num_nodes = forward.num_nodes();
    let mut order = vec![0u64; num_nodes as usize];
    let mut visited = Bitmap::new(num_nodes);
    let mut queue = VecDeque::new();
    let mut next_ordinal = 0u64;
    let mut components = 0u64;

    for root in 0..num_nodes {
        if visited.get(root) {
            continue;
        }
        components += 1;
        visited.set(root);
        queue.push_back(root);
        while let Some(node) = queue.pop_front() {
            order[node as usize] = next_ordinal;
            next_ordinal += 1;
            let union = UnionSuccessors::new(
                forward.successors(node)?,
                transposed.successors(node)?,
            );
            for succ in union {
                if !visited.get(succ) {
                    visited.set(succ);
                    queue.push_back(succ);
                }
            }
        }
    }
    debug!(nodes = num_nodes, components, "compress.bfs.done");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BvGraphWriter;

    #[test]
    fn union_merges_and_dedups() {
        let merged: Vec<u64> =
            UnionSuccessors::new([1u64, 3, 5].into_iter(), [2u64, 3, 6].into_iter()).collect();
        assert_eq!(merged, vec![1, 2, 3, 5, 6]);
        let merged: Vec<u64> =
            UnionSuccessors::new([].into_iter(), [7u64].into_iter()).collect();
        assert_eq!(merged, vec![7]);
    }

    fn graph(dir: &std::path::Path, name: &str, lists: &[Vec<u64>]) -> BvGraph {
        let base = dir.join(name);
        let mut writer = BvGraphWriter::new(lists.len() as u64);
        for list in lists {
            writer.write_node(list).unwrap();
        }
        writer.finish(&base).unwrap();
        BvGraph::load(&base).unwrap()
    }

    #[test]
    fn bfs_renumbers_components_contiguously() {
        let dir = tempfile::tempdir().unwrap();
        // Two components in hash order: {0, 2, 4} chained and {1, 3} chained.
        let forward = graph(
            dir.path(),
            "fwd",
            &[vec![2], vec![3], vec![4], vec![], vec![]],
        );
        let transposed = graph(
            dir.path(),
            "bwd",
            &[vec![], vec![], vec![0], vec![1], vec![2]],
        );
        let order = bfs_order(&forward, &transposed).unwrap();
        assert_eq!(order, vec![0, 3, 1, 4, 2]);

        // The permutation is a bijection.
        let mut seen = vec![false; order.len()];
        for &ordinal in &order {
            assert!(!seen[ordinal as usize]);
            seen[ordinal as usize] = true;
        }
    }

    #[test]
    fn bfs_reaches_ancestors_through_transposed_arcs() {
        let dir = tempfile::tempdir().unwrap();
        // 1 -> 0 is only discoverable from root 0 through the transpose.
        let forward = graph(dir.path(), "fwd", &[vec![], vec![0]]);
        let transposed = graph(dir.path(), "bwd", &[vec![1], vec![]]);
        let order = bfs_order(&forward, &transposed).unwrap();
        assert_eq!(order, vec![0, 1]);
    }
}
