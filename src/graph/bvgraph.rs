//! Bit-compressed adjacency store.
//!
//! Each node's entry is a gamma-coded outdegree followed by its successors
//! as gaps: the first successor is a zig-zag delta from the node id, every
//! later one is the gap to its predecessor minus one. Successor lists are
//! strictly increasing, so every gap code is non-negative.
//!
//! Four files share a basename: `.graph` (the bit stream), `.offsets`
//! (gamma-coded deltas of the per-node bit offsets), `.obl` (the same
//! offsets as packed big-endian u64 records for O(1) mmapped access), and
//! `.properties` (`key=value` text carrying node and arc counts).

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::bits::{unzigzag, zigzag, BitReader, BitWriter};
use crate::error::{GraphError, Result};
use crate::graph::NodeId;
use crate::region::Region;
use crate::util::suffix_path;

pub const GRAPH_EXT: &str = ".graph";
pub const OFFSETS_EXT: &str = ".offsets";
pub const OFFSETS_TABLE_EXT: &str = ".obl";
pub const PROPERTIES_EXT: &str = ".properties";

const FORMAT_VERSION: u32 = 1;

/// Streaming writer; nodes must be pushed in increasing id order, once each.
pub struct BvGraphWriter {
    num_nodes: u64,
    next_node: u64,
    num_arcs: u64,
    bits: BitWriter,
    offsets: Vec<u64>,
}

impl BvGraphWriter {
    pub fn new(num_nodes: u64) -> BvGraphWriter {
        let mut offsets = Vec::with_capacity(num_nodes as usize + 1);
        offsets.push(0);
        BvGraphWriter {
            num_nodes,
            next_node: 0,
            num_arcs: 0,
            bits: BitWriter::new(),
            offsets,
        }
    }

    /// Appends the successor list of the next node. Successors must be
    /// strictly increasing node ids.
    pub fn write_node(&mut self, successors: &[NodeId]) -> Result<()> {
        if self.next_node >= self.num_nodes {
            return Err(GraphError::Compression(format!(
                "more adjacency lists than the declared {} nodes",
                self.num_nodes
            )));
        }
        let node = self.next_node;
        self.bits.write_gamma(successors.len() as u64);
        let mut prev = None;
        for &succ in successors {
            if succ >= self.num_nodes {
                return Err(GraphError::Compression(format!(
                    "successor {succ} of node {node} out of range"
                )));
            }
            match prev {
                None => {
                    let delta = succ as i64 - node as i64;
                    self.bits.write_gamma(zigzag(delta));
                }
                Some(p) => {
                    if succ <= p {
                        return Err(GraphError::Compression(format!(
                            "successors of node {node} are not strictly increasing"
                        )));
                    }
                    self.bits.write_gamma(succ - p - 1);
                }
            }
            prev = Some(succ);
        }
        self.num_arcs += successors.len() as u64;
        self.offsets.push(self.bits.bit_len());
        self.next_node += 1;
        Ok(())
    }

    /// Writes the four artifact files under `base`.
    pub fn finish(self, base: &Path) -> Result<(u64, u64)> {
        if self.next_node != self.num_nodes {
            return Err(GraphError::Compression(format!(
                "wrote {} adjacency lists for a graph of {} nodes",
                self.next_node, self.num_nodes
            )));
        }
        let (stream, _) = self.bits.finish();
        std::fs::write(suffix_path(base, GRAPH_EXT), &stream)?;

        let mut offset_bits = BitWriter::new();
        let mut prev = 0;
        for &offset in &self.offsets {
            offset_bits.write_gamma(offset - prev);
            prev = offset;
        }
        let (offset_stream, _) = offset_bits.finish();
        std::fs::write(suffix_path(base, OFFSETS_EXT), &offset_stream)?;

        let mut table = BufWriter::new(File::create(suffix_path(base, OFFSETS_TABLE_EXT))?);
        for &offset in &self.offsets {
            table.write_all(&offset.to_be_bytes())?;
        }
        table.flush()?;

        let mut properties = File::create(suffix_path(base, PROPERTIES_EXT))?;
        writeln!(properties, "version={FORMAT_VERSION}")?;
        writeln!(properties, "nodes={}", self.num_nodes)?;
        writeln!(properties, "arcs={}", self.num_arcs)?;

        Ok((self.num_nodes, self.num_arcs))
    }
}

enum Offsets {
    /// Mmapped `.obl` table of big-endian u64 records.
    Mapped(Region),
    /// Decoded in memory from the `.offsets` gamma stream.
    Decoded(std::sync::Arc<[u64]>),
}

impl Clone for Offsets {
    fn clone(&self) -> Offsets {
        match self {
            Offsets::Mapped(region) => Offsets::Mapped(region.clone()),
            Offsets::Decoded(table) => Offsets::Decoded(table.clone()),
        }
    }
}

/// Random-access reader over one direction of the compressed graph.
///
/// Cloning yields a lightweight duplicate: the mmapped buffers are shared,
/// while every successor iterator owns its own bit cursor, so duplicates are
/// safe to hand out per thread.
#[derive(Clone)]
pub struct BvGraph {
    data: Region,
    offsets: Offsets,
    num_nodes: u64,
    num_arcs: u64,
}

impl BvGraph {
    pub fn load(base: &Path) -> Result<BvGraph> {
        let (num_nodes, num_arcs) = read_properties(&suffix_path(base, PROPERTIES_EXT))?;
        let data = Region::map_file(&suffix_path(base, GRAPH_EXT))?;

        let table_path = suffix_path(base, OFFSETS_TABLE_EXT);
        let expected_table_len = (num_nodes as usize + 1) * 8;
        let offsets = match Region::map_file(&table_path) {
            Ok(region) if region.len() == expected_table_len => Offsets::Mapped(region),
            // Missing or stale table: fall back to the gamma-coded offsets.
            _ => Offsets::Decoded(decode_offsets(
                &suffix_path(base, OFFSETS_EXT),
                num_nodes,
            )?),
        };

        let graph = BvGraph {
            data,
            offsets,
            num_nodes,
            num_arcs,
        };
        let end = graph.offset(num_nodes)?;
        if end > graph.data.len() as u64 * 8 {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: offsets extend past the bit stream",
                base.display()
            )));
        }
        Ok(graph)
    }

    pub fn num_nodes(&self) -> u64 {
        self.num_nodes
    }

    pub fn num_arcs(&self) -> u64 {
        self.num_arcs
    }

    fn offset(&self, node: u64) -> Result<u64> {
        match &self.offsets {
            Offsets::Mapped(region) => region.u64_be(node),
            Offsets::Decoded(table) => Ok(table[node as usize]),
        }
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if node >= self.num_nodes {
            return Err(GraphError::OutOfRange {
                id: node,
                nodes: self.num_nodes,
            });
        }
        Ok(())
    }

    pub fn outdegree(&self, node: NodeId) -> Result<u64> {
        self.check_node(node)?;
        let mut reader = BitReader::new(self.data.bytes());
        reader.seek(self.offset(node)?)?;
        let degree = reader.read_gamma();
        if reader.is_overrun() {
            return Err(GraphError::ArtifactCorrupt(format!(
                "truncated adjacency entry for node {node}"
            )));
        }
        Ok(degree)
    }

    /// Lazy successor iterator; yields neighbor ids in strictly increasing
    /// order. The iterator borrows the shared stream but owns its cursor.
    pub fn successors(&self, node: NodeId) -> Result<Successors<'_>> {
        self.check_node(node)?;
        let mut reader = BitReader::new(self.data.bytes());
        reader.seek(self.offset(node)?)?;
        let degree = reader.read_gamma();
        if reader.is_overrun() {
            return Err(GraphError::ArtifactCorrupt(format!(
                "truncated adjacency entry for node {node}"
            )));
        }
        Ok(Successors {
            reader,
            node,
            remaining: degree,
            prev: 0,
            first: true,
        })
    }
}

pub struct Successors<'a> {
    reader: BitReader<'a>,
    node: u64,
    remaining: u64,
    prev: u64,
    first: bool,
}

impl Iterator for Successors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let code = self.reader.read_gamma();
        if self.reader.is_overrun() {
            // Truncated entry; offsets were validated at load, so this only
            // triggers on a corrupt stream. Fuse rather than loop.
            self.remaining = 0;
            return None;
        }
        let succ = if self.first {
            self.first = false;
            (self.node as i64 + unzigzag(code)) as u64
        } else {
            self.prev + code + 1
        };
        self.prev = succ;
        self.remaining -= 1;
        Some(succ)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

fn read_properties(path: &Path) -> Result<(u64, u64)> {
    let mut text = String::new();
    File::open(path)
        .map_err(|e| {
            GraphError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {e}", path.display()),
            ))
        })?
        .read_to_string(&mut text)?;
    let mut nodes = None;
    let mut arcs = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "nodes" => nodes = value.parse::<u64>().ok(),
            "arcs" => arcs = value.parse::<u64>().ok(),
            _ => {}
        }
    }
    match (nodes, arcs) {
        (Some(n), Some(a)) => Ok((n, a)),
        _ => Err(GraphError::ArtifactCorrupt(format!(
            "{}: missing nodes/arcs declaration",
            path.display()
        ))),
    }
}

fn decode_offsets(path: &Path, num_nodes: u64) -> Result<std::sync::Arc<[u64]>> {
    let stream = std::fs::read(path)?;
    let mut reader = BitReader::new(&stream);
    let mut table = Vec::with_capacity(num_nodes as usize + 1);
    let mut offset = 0u64;
    for _ in 0..=num_nodes {
        offset += reader.read_gamma();
        if reader.is_overrun() {
            return Err(GraphError::ArtifactCorrupt(format!(
                "{}: truncated offset stream",
                path.display()
            )));
        }
        table.push(offset);
    }
    Ok(table.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_graph(dir: &Path, lists: &[Vec<u64>]) -> BvGraph {
        let base = dir.join("graph");
        let mut writer = BvGraphWriter::new(lists.len() as u64);
        for list in lists {
            writer.write_node(list).unwrap();
        }
        writer.finish(&base).unwrap();
        BvGraph::load(&base).unwrap()
    }

    #[test]
    fn roundtrip_small_graph() {
        let dir = tempfile::tempdir().unwrap();
        let lists = vec![vec![1, 2], vec![0, 3], vec![], vec![3]];
        let graph = write_graph(dir.path(), &lists);
        assert_eq!(graph.num_nodes(), 4);
        assert_eq!(graph.num_arcs(), 5);
        for (node, expected) in lists.iter().enumerate() {
            assert_eq!(graph.outdegree(node as u64).unwrap(), expected.len() as u64);
            let got: Vec<u64> = graph.successors(node as u64).unwrap().collect();
            assert_eq!(&got, expected);
        }
    }

    #[test]
    fn loads_without_offset_table() {
        let dir = tempfile::tempdir().unwrap();
        let lists = vec![vec![1], vec![]];
        write_graph(dir.path(), &lists);
        std::fs::remove_file(dir.path().join("graph.obl")).unwrap();
        let graph = BvGraph::load(&dir.path().join("graph")).unwrap();
        let got: Vec<u64> = graph.successors(0).unwrap().collect();
        assert_eq!(got, vec![1]);
    }

    #[test]
    fn empty_graph() {
        let dir = tempfile::tempdir().unwrap();
        let graph = write_graph(dir.path(), &[]);
        assert_eq!(graph.num_nodes(), 0);
        assert!(matches!(
            graph.outdegree(0),
            Err(GraphError::OutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_unsorted_successors() {
        let mut writer = BvGraphWriter::new(3);
        assert!(writer.write_node(&[2, 1]).is_err());
    }

    #[test]
    fn rejects_out_of_range_successor() {
        let mut writer = BvGraphWriter::new(2);
        assert!(writer.write_node(&[2]).is_err());
    }

    #[test]
    fn out_of_range_node_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let graph = write_graph(dir.path(), &[vec![]]);
        assert!(matches!(
            graph.successors(1),
            Err(GraphError::OutOfRange { id: 1, nodes: 1 })
        ));
    }
}
