//! Edge-restricted traversal kernel.
//!
//! Depth-first search over either direction of the store, constrained by an
//! [`AllowedEdges`] matrix. The kernel is a pure function over the immutable
//! store: it never retries, and cancellation or a depth cap abort it with a
//! clean error and no partial results.
//!
//! Archive depths far exceed safe call-stack limits, so the recursion is an
//! explicit stack of `(node, successor-cursor)` frames.
//!
//! Node-set traversals use a visited bitmap and touch every node once. Path
//! traversals deliberately do not: re-expansion is what enumerates distinct
//! root-to-leaf paths, which also means the edge filter must induce a DAG.
//! The depth cap turns an accidental cycle into [`GraphError::PathDepthExceeded`]
//! instead of a hang.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bits::Bitmap;
use crate::edges::AllowedEdges;
use crate::error::{GraphError, Result};
use crate::graph::{GraphStore, NodeId, Successors};
use crate::pid::Pid;

/// Default cap on the current path length in the path-producing modes.
pub const DEFAULT_PATH_DEPTH_CAP: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl FromStr for Direction {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Direction> {
        match s {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            _ => Err(GraphError::BadSpec(format!("traversal direction '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Insertion-ordered set of visited nodes.
    Nodes,
    /// Root-to-leaf paths under the edge filter.
    Paths,
    /// Both at once; duplicate visits re-expand.
    NodesAndPaths,
}

impl FromStr for OutputFormat {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<OutputFormat> {
        match s {
            "nodes" => Ok(OutputFormat::Nodes),
            "paths" => Ok(OutputFormat::Paths),
            "nodes+paths" => Ok(OutputFormat::NodesAndPaths),
            _ => Err(GraphError::BadSpec(format!("output format '{s}'"))),
        }
    }
}

/// Knobs of a single traversal.
#[derive(Clone, Default)]
pub struct VisitOptions {
    /// Cap on the path length in `Paths`/`NodesAndPaths` modes; `None` means
    /// [`DEFAULT_PATH_DEPTH_CAP`].
    pub max_depth: Option<usize>,
    /// Cooperative cancellation flag, polled at every node pop.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Result of a traversal: visited PIDs in insertion order, each at most
/// once, and (in the path modes) the enumerated root-to-leaf paths.
pub struct VisitOutcome {
    pub nodes: Vec<Pid>,
    pub paths: Vec<Vec<Pid>>,
}

/// Full reachable set / path enumeration from `src` under `edge_spec`.
pub fn visit(
    store: &GraphStore,
    src: &Pid,
    direction: Direction,
    edge_spec: &str,
    output: OutputFormat,
    options: &VisitOptions,
) -> Result<VisitOutcome> {
    let edges = AllowedEdges::compile(edge_spec)?;
    let src_id = store.node_id(src)?;
    let walker = Walker {
        store,
        edges,
        transposed: direction == Direction::Backward,
        max_depth: options.max_depth.unwrap_or(DEFAULT_PATH_DEPTH_CAP),
        cancel: options.cancel.clone(),
    };
    match output {
        OutputFormat::Nodes => walker.visit_nodes(src_id),
        OutputFormat::Paths | OutputFormat::NodesAndPaths => walker.visit_paths(src_id),
    }
}

/// Same kernel as [`visit`] with an explicit depth cap, the shape exposed to
/// clients that bound their walks.
pub fn walk(
    store: &GraphStore,
    src: &Pid,
    direction: Direction,
    edge_spec: &str,
    output: OutputFormat,
    max_depth: usize,
) -> Result<VisitOutcome> {
    visit(
        store,
        src,
        direction,
        edge_spec,
        output,
        &VisitOptions {
            max_depth: Some(max_depth),
            cancel: None,
        },
    )
}

/// One-hop neighbors of `src` allowed by `edge_spec`, in increasing internal
/// id order.
pub fn neighbors(
    store: &GraphStore,
    src: &Pid,
    direction: Direction,
    edge_spec: &str,
) -> Result<Vec<Pid>> {
    let edges = AllowedEdges::compile(edge_spec)?;
    let src_id = store.node_id(src)?;
    let src_type = store.node_type(src_id)?;
    let transposed = direction == Direction::Backward;
    let mut out = Vec::new();
    for succ in store.neighbors(src_id, transposed)? {
        if edges.allowed(src_type, store.node_type(succ)?) {
            out.push(store.pid(succ)?);
        }
    }
    Ok(out)
}

struct Walker<'a> {
    store: &'a GraphStore,
    edges: AllowedEdges,
    transposed: bool,
    max_depth: usize,
    cancel: Option<Arc<AtomicBool>>,
}

struct Frame<'a> {
    node: NodeId,
    successors: Successors<'a>,
    /// Whether any allowed neighbor was expanded from this frame.
    expanded: bool,
}

impl<'a> Walker<'a> {
    fn frame(&self, node: NodeId) -> Result<Frame<'a>> {
        Ok(Frame {
            node,
            successors: self.store.neighbors(node, self.transposed)?,
            expanded: false,
        })
    }

    /// The edge filter applies to (current, neighbor) type pairs in both
    /// directions; only the successor source flips.
    fn next_allowed(&self, frame: &mut Frame<'_>) -> Result<Option<NodeId>> {
        let node_type = self.store.node_type(frame.node)?;
        for succ in frame.successors.by_ref() {
            if self.edges.allowed(node_type, self.store.node_type(succ)?) {
                return Ok(Some(succ));
            }
        }
        Ok(None)
    }

    fn check_cancelled(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(GraphError::Cancelled);
            }
        }
        Ok(())
    }

    fn visit_nodes(&self, src: NodeId) -> Result<VisitOutcome> {
        let mut visited = Bitmap::new(self.store.num_nodes());
        let mut nodes = Vec::new();
        let mut stack = Vec::new();

        visited.set(src);
        nodes.push(self.store.pid(src)?);
        stack.push(self.frame(src)?);

        while let Some(frame) = stack.last_mut() {
            match self.next_allowed(frame)? {
                Some(succ) if !visited.get(succ) => {
                    visited.set(succ);
                    nodes.push(self.store.pid(succ)?);
                    stack.push(self.frame(succ)?);
                }
                Some(_) => {}
                None => {
                    stack.pop();
                    self.check_cancelled()?;
                }
            }
        }

        Ok(VisitOutcome {
            nodes,
            paths: Vec::new(),
        })
    }

    fn visit_paths(&self, src: NodeId) -> Result<VisitOutcome> {
        let mut seen = Bitmap::new(self.store.num_nodes());
        let mut nodes = Vec::new();
        let mut paths = Vec::new();
        let mut current_path = vec![src];
        let mut stack = vec![self.frame(src)?];

        seen.set(src);
        nodes.push(self.store.pid(src)?);

        while let Some(frame) = stack.last_mut() {
            match self.next_allowed(frame)? {
                Some(succ) => {
                    frame.expanded = true;
                    if current_path.len() >= self.max_depth {
                        return Err(GraphError::PathDepthExceeded(self.max_depth));
                    }
                    current_path.push(succ);
                    if !seen.get(succ) {
                        seen.set(succ);
                        nodes.push(self.store.pid(succ)?);
                    }
                    stack.push(self.frame(succ)?);
                }
                None => {
                    let frame = stack.pop().expect("stack is non-empty");
                    if !frame.expanded {
                        // A leaf under the filter: the current stack is one
                        // root-to-leaf path.
                        let path = current_path
                            .iter()
                            .map(|&node| self.store.pid(node))
                            .collect::<Result<Vec<Pid>>>()?;
                        paths.push(path);
                    }
                    current_path.pop();
                    self.check_cancelled()?;
                }
            }
        }

        Ok(VisitOutcome { nodes, paths })
    }
}
