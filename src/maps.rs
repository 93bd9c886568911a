//! Identifier translation and node-type lookup.
//!
//! External PIDs and internal node ids are bridged by three artifacts: the
//! minimal perfect hash (`.mph`), the permutation from hash ordinal to BFS
//! ordinal (`.order`, packed big-endian u64), and the fixed-width
//! `.node2pid.csv` file whose line `i` sits at byte `i * 51`. The node-type
//! table is a 3-bit packed vector loaded fully in memory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::graph::NodeId;
use crate::mph::Mph;
use crate::pid::{NodeType, Pid, PID_STR_LEN};
use crate::region::Region;
use crate::util::suffix_path;

pub const MPH_EXT: &str = ".mph";
pub const ORDER_EXT: &str = ".order";
pub const PID_TO_NODE_EXT: &str = ".pid2node.csv";
pub const NODE_TO_PID_EXT: &str = ".node2pid.csv";
pub const NODE_TO_TYPE_EXT: &str = ".node2type.map";

/// Line width of `.node2pid.csv`: the PID plus a newline.
pub const NODE_TO_PID_LINE_LEN: usize = PID_STR_LEN + 1;
/// Line width of `.pid2node.csv`: PID, space, zero-padded 19-digit id
/// (the widest a 64-bit id needs), newline.
pub const PID_TO_NODE_LINE_LEN: usize = PID_STR_LEN + 1 + 19 + 1;

/// Bidirectional PID <-> node id mapping.
pub struct NodeIdMap {
    mph: Mph,
    order: Region,
    node_to_pid: Region,
    num_nodes: u64,
}

impl NodeIdMap {
    pub fn load(base: &Path, num_nodes: u64) -> Result<NodeIdMap> {
        let mph = Mph::load(&suffix_path(base, MPH_EXT))?;
        if mph.num_keys() != num_nodes {
            return Err(GraphError::ArtifactCorrupt(format!(
                "mph covers {} keys but the graph has {num_nodes} nodes",
                mph.num_keys()
            )));
        }
        let order = Region::map_file(&suffix_path(base, ORDER_EXT))?;
        if order.len() as u64 != num_nodes * 8 {
            return Err(GraphError::ArtifactCorrupt(format!(
                "order file holds {} bytes, expected {}",
                order.len(),
                num_nodes * 8
            )));
        }
        let node_to_pid = Region::map_file(&suffix_path(base, NODE_TO_PID_EXT))?;
        if node_to_pid.len() as u64 != num_nodes * NODE_TO_PID_LINE_LEN as u64 {
            return Err(GraphError::ArtifactCorrupt(format!(
                "node2pid file holds {} bytes, expected {}",
                node_to_pid.len(),
                num_nodes * NODE_TO_PID_LINE_LEN as u64
            )));
        }
        Ok(NodeIdMap {
            mph,
            order,
            node_to_pid,
            num_nodes,
        })
    }

    pub fn num_nodes(&self) -> u64 {
        self.num_nodes
    }

    /// Looks up the internal id of a PID.
    ///
    /// The hash function maps foreign keys to arbitrary ordinals, so the
    /// candidate id is only trusted after its stored PID matches the query.
    pub fn node_id(&self, pid: &Pid) -> Result<NodeId> {
        if self.num_nodes == 0 {
            return Err(GraphError::UnknownPid(pid.to_string()));
        }
        let ordinal = self.mph.get(&pid.to_str_bytes());
        let id = self.order.u64_be(ordinal)?;
        if id >= self.num_nodes {
            return Err(GraphError::ArtifactCorrupt(format!(
                "order entry {ordinal} maps to id {id} out of range"
            )));
        }
        if self.pid(id)? != *pid {
            return Err(GraphError::UnknownPid(pid.to_string()));
        }
        Ok(id)
    }

    /// Reads the PID stored for an internal id.
    pub fn pid(&self, id: NodeId) -> Result<Pid> {
        if id >= self.num_nodes {
            return Err(GraphError::OutOfRange {
                id,
                nodes: self.num_nodes,
            });
        }
        let start = id as usize * NODE_TO_PID_LINE_LEN;
        let line = &self.node_to_pid.bytes()[start..start + PID_STR_LEN];
        Pid::parse(line)
            .map_err(|_| GraphError::ArtifactCorrupt(format!("unparsable pid at node {id}")))
    }
}

const TYPE_MAP_MAGIC: &[u8; 8] = b"STRATYPE";
const BITS_PER_TYPE: u64 = 3;

/// Packed node-type table, 3 bits per node.
///
/// Bit layout: little-endian within each u64 word, ascending id maps to
/// ascending bit position, entries may straddle a word boundary. Words are
/// stored little-endian after an 8-byte magic and the u64 node count.
pub struct TypeMap {
    words: Vec<u64>,
    num_nodes: u64,
}

impl TypeMap {
    pub fn load(path: &Path) -> Result<TypeMap> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 16 || &bytes[..8] != TYPE_MAP_MAGIC {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: bad type map header",
                path.display()
            )));
        }
        let num_nodes = u64::from_le_bytes(bytes[8..16].try_into().expect("slice is 8 bytes"));
        let num_words = (num_nodes * BITS_PER_TYPE).div_ceil(64) as usize;
        if bytes.len() != 16 + num_words * 8 {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: type map holds {} bytes for {num_nodes} nodes",
                path.display(),
                bytes.len()
            )));
        }
        let words = bytes[16..]
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes")))
            .collect();
        Ok(TypeMap { words, num_nodes })
    }

    pub fn num_nodes(&self) -> u64 {
        self.num_nodes
    }

    pub fn get(&self, id: NodeId) -> Result<NodeType> {
        if id >= self.num_nodes {
            return Err(GraphError::OutOfRange {
                id,
                nodes: self.num_nodes,
            });
        }
        let bit = id * BITS_PER_TYPE;
        let word = (bit / 64) as usize;
        let shift = bit % 64;
        let mut value = self.words[word] >> shift;
        if shift > 64 - BITS_PER_TYPE {
            // The entry straddles into the next word.
            value |= self.words[word + 1] << (64 - shift);
        }
        let ordinal = (value & 0b111) as u8;
        NodeType::from_ordinal(ordinal).ok_or_else(|| {
            GraphError::ArtifactCorrupt(format!("node {id} has invalid type ordinal {ordinal}"))
        })
    }
}

/// Accumulates the packed table; types may be set in any id order.
pub struct TypeMapBuilder {
    words: Vec<u64>,
    num_nodes: u64,
}

impl TypeMapBuilder {
    pub fn new(num_nodes: u64) -> TypeMapBuilder {
        TypeMapBuilder {
            words: vec![0; (num_nodes * BITS_PER_TYPE).div_ceil(64) as usize],
            num_nodes,
        }
    }

    pub fn set(&mut self, id: NodeId, node_type: NodeType) -> Result<()> {
        if id >= self.num_nodes {
            return Err(GraphError::OutOfRange {
                id,
                nodes: self.num_nodes,
            });
        }
        let value = u64::from(node_type.ordinal());
        let bit = id * BITS_PER_TYPE;
        let word = (bit / 64) as usize;
        let shift = bit % 64;
        self.words[word] &= !(0b111 << shift);
        self.words[word] |= value << shift;
        if shift > 64 - BITS_PER_TYPE {
            let spill = 64 - shift;
            self.words[word + 1] &= !(0b111 >> spill);
            self.words[word + 1] |= value >> spill;
        }
        Ok(())
    }

    pub fn store(self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(TYPE_MAP_MAGIC)?;
        out.write_all(&self.num_nodes.to_le_bytes())?;
        for word in &self.words {
            out.write_all(&word.to_le_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Writes the fixed-width `.pid2node.csv` line for one node.
pub fn write_pid_to_node_line<W: Write>(out: &mut W, pid: &Pid, id: NodeId) -> Result<()> {
    out.write_all(&pid.to_str_bytes())?;
    write!(out, " {id:019}")?;
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_map_roundtrip_across_word_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.map");
        let all = NodeType::all();
        let count = 100u64;
        let mut builder = TypeMapBuilder::new(count);
        for id in 0..count {
            builder.set(id, all[(id % 6) as usize]).unwrap();
        }
        builder.store(&path).unwrap();

        let map = TypeMap::load(&path).unwrap();
        assert_eq!(map.num_nodes(), count);
        for id in 0..count {
            assert_eq!(map.get(id).unwrap(), all[(id % 6) as usize]);
        }
        assert!(matches!(
            map.get(count),
            Err(GraphError::OutOfRange { .. })
        ));
    }

    #[test]
    fn type_map_rejects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.map");
        let mut builder = TypeMapBuilder::new(64);
        for id in 0..64 {
            builder.set(id, NodeType::Revision).unwrap();
        }
        builder.store(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(
            TypeMap::load(&path),
            Err(GraphError::ArtifactCorrupt(_))
        ));
    }

    #[test]
    fn pid_to_node_line_width() {
        let pid = Pid::new(NodeType::Snapshot, [0xab; 20]);
        let mut line = Vec::new();
        write_pid_to_node_line(&mut line, &pid, 42).unwrap();
        assert_eq!(line.len(), PID_TO_NODE_LINE_LEN);
        assert!(line.ends_with(b"0042\n"));
    }
}
