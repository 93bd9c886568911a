//! Read-only compressed graph engine for Software Heritage archive
//! traversals.
//!
//! The archive's Merkle DAG is kept resident as a pair of bit-compressed
//! adjacency stores (forward and transposed) plus identifier maps, a packed
//! node-type table, and optional property columns, all memory-mapped from
//! the artifacts produced by the offline [`compress`] pipeline. On top of
//! that sits a typed traversal kernel answering neighbor, visit, and walk
//! queries constrained by node-type and edge-type filters.

pub mod bits;
pub mod compress;
pub mod edges;
pub mod error;
pub mod graph;
pub mod maps;
pub mod mph;
pub mod pid;
pub mod properties;
pub mod traversal;

mod region;
mod util;

pub use crate::edges::{AllowedEdges, NodeFilter};
pub use crate::error::{GraphError, Result};
pub use crate::graph::{BvGraph, GraphStore, GraphView, NodeId, Subgraph};
pub use crate::pid::{NodeType, Pid};
pub use crate::traversal::{Direction, OutputFormat, VisitOptions, VisitOutcome};
