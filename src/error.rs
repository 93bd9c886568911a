use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("malformed persistent identifier: {0}")]
    BadPid(String),
    #[error("unknown persistent identifier: {0}")]
    UnknownPid(String),
    #[error("node id {id} out of range for graph with {nodes} nodes")]
    OutOfRange { id: u64, nodes: u64 },
    #[error("invalid filter spec: {0}")]
    BadSpec(String),
    #[error("property column '{0}' is not loaded")]
    NotLoaded(&'static str),
    #[error("corrupt artifact: {0}")]
    ArtifactCorrupt(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("path depth cap of {0} exceeded")]
    PathDepthExceeded(usize),
    #[error("traversal cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
