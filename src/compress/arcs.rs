//! External-memory sorting of arc streams.
//!
//! Arc producers push (src, dst) pairs into a [`PairSorter`]; full batches
//! are sorted in parallel, deduplicated, and spilled to run files in the
//! temp directory. Draining the sorter k-way merges the runs and the
//! resident batch into one globally sorted, deduplicated pair stream.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rayon::slice::ParallelSliceMut;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::bvgraph::BvGraphWriter;
use crate::graph::NodeId;

pub(crate) struct PairSorter {
    batch: Vec<(u64, u64)>,
    batch_size: usize,
    runs: Vec<PathBuf>,
    temp_dir: PathBuf,
}

impl PairSorter {
    pub(crate) fn new(batch_size: usize, temp_dir: &Path) -> PairSorter {
        PairSorter {
            batch: Vec::with_capacity(batch_size.min(1 << 20)),
            batch_size: batch_size.max(1),
            runs: Vec::new(),
            temp_dir: temp_dir.to_path_buf(),
        }
    }

    pub(crate) fn push(&mut self, src: u64, dst: u64) -> Result<()> {
        self.batch.push((src, dst));
        if self.batch.len() >= self.batch_size {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        self.batch.par_sort_unstable();
        self.batch.dedup();
        let path = self.temp_dir.join(format!("run-{:06}.pairs", self.runs.len()));
        let mut out = BufWriter::new(File::create(&path)?);
        for &(src, dst) in &self.batch {
            out.write_all(&src.to_le_bytes())?;
            out.write_all(&dst.to_le_bytes())?;
        }
        out.flush()?;
        debug!(run = %path.display(), pairs = self.batch.len(), "compress.sort.spill");
        self.runs.push(path);
        self.batch.clear();
        Ok(())
    }

    /// Consumes the sorter and yields all pairs in sorted order without
    /// duplicates.
    pub(crate) fn into_sorted(mut self) -> Result<SortedPairs> {
        self.batch.par_sort_unstable();
        self.batch.dedup();
        let mut readers = Vec::with_capacity(self.runs.len());
        for path in &self.runs {
            readers.push(RunReader::open(path)?);
        }
        let mut heap = BinaryHeap::new();
        for (index, reader) in readers.iter_mut().enumerate() {
            if let Some(pair) = reader.next()? {
                heap.push(Reverse((pair, index)));
            }
        }
        Ok(SortedPairs {
            resident: self.batch.into_iter(),
            resident_head: None,
            readers,
            heap,
            last: None,
            runs: self.runs,
        })
    }
}

struct RunReader {
    input: BufReader<File>,
}

impl RunReader {
    fn open(path: &Path) -> Result<RunReader> {
        Ok(RunReader {
            input: BufReader::new(File::open(path)?),
        })
    }

    fn next(&mut self) -> Result<Option<(u64, u64)>> {
        let mut buf = [0u8; 16];
        match self.input.read_exact(&mut buf) {
            Ok(()) => Ok(Some((
                u64::from_le_bytes(buf[..8].try_into().expect("slice is 8 bytes")),
                u64::from_le_bytes(buf[8..].try_into().expect("slice is 8 bytes")),
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(GraphError::Io(e)),
        }
    }
}

pub(crate) struct SortedPairs {
    resident: std::vec::IntoIter<(u64, u64)>,
    resident_head: Option<(u64, u64)>,
    readers: Vec<RunReader>,
    heap: BinaryHeap<Reverse<((u64, u64), usize)>>,
    last: Option<(u64, u64)>,
    runs: Vec<PathBuf>,
}

impl SortedPairs {
    fn next_pair(&mut self) -> Result<Option<(u64, u64)>> {
        loop {
            if self.resident_head.is_none() {
                self.resident_head = self.resident.next();
            }
            let from_runs = self.heap.peek().map(|Reverse((pair, _))| *pair);
            let candidate = match (self.resident_head, from_runs) {
                (None, None) => return Ok(None),
                (Some(r), None) => {
                    self.resident_head = None;
                    r
                }
                (None, Some(_)) => self.pop_run()?,
                (Some(r), Some(h)) => {
                    if r <= h {
                        self.resident_head = None;
                        r
                    } else {
                        self.pop_run()?
                    }
                }
            };
            if self.last == Some(candidate) {
                continue;
            }
            self.last = Some(candidate);
            return Ok(Some(candidate));
        }
    }

    fn pop_run(&mut self) -> Result<(u64, u64)> {
        let Reverse((pair, index)) = self.heap.pop().expect("heap is non-empty");
        if let Some(next) = self.readers[index].next()? {
            self.heap.push(Reverse((next, index)));
        }
        Ok(pair)
    }
}

impl Iterator for SortedPairs {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Result<(u64, u64)>> {
        self.next_pair().transpose()
    }
}

impl Drop for SortedPairs {
    fn drop(&mut self) {
        for path in &self.runs {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Groups a sorted pair stream by source and writes the compressed graph.
pub(crate) fn write_graph_from_sorted_pairs(
    base: &Path,
    num_nodes: u64,
    pairs: impl Iterator<Item = Result<(u64, u64)>>,
) -> Result<(u64, u64)> {
    let mut writer = BvGraphWriter::new(num_nodes);
    let mut successors: Vec<NodeId> = Vec::new();
    let mut current = 0u64;
    for pair in pairs {
        let (src, dst) = pair?;
        if src >= num_nodes || dst >= num_nodes {
            return Err(GraphError::Compression(format!(
                "arc ({src}, {dst}) outside the {num_nodes}-node id space"
            )));
        }
        while current < src {
            writer.write_node(&successors)?;
            successors.clear();
            current += 1;
        }
        successors.push(dst);
    }
    while current < num_nodes {
        writer.write_node(&successors)?;
        successors.clear();
        current += 1;
    }
    writer.finish(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_and_dedups_across_spills() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = PairSorter::new(4, dir.path());
        let pairs = [
            (3, 1),
            (0, 2),
            (3, 1),
            (1, 0),
            (0, 1),
            (2, 2),
            (0, 2),
            (1, 3),
            (0, 0),
        ];
        for (src, dst) in pairs {
            sorter.push(src, dst).unwrap();
        }
        let sorted: Vec<(u64, u64)> = sorter
            .into_sorted()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            sorted,
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 3), (2, 2), (3, 1)]
        );
    }

    #[test]
    fn graph_from_pairs_covers_every_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = PairSorter::new(1000, dir.path());
        for (src, dst) in [(0u64, 2u64), (0, 3), (2, 1)] {
            sorter.push(src, dst).unwrap();
        }
        let base = dir.path().join("g");
        let (nodes, arcs) =
            write_graph_from_sorted_pairs(&base, 5, sorter.into_sorted().unwrap()).unwrap();
        assert_eq!((nodes, arcs), (5, 3));
        let graph = crate::graph::BvGraph::load(&base).unwrap();
        assert_eq!(
            graph.successors(0).unwrap().collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(graph.outdegree(4).unwrap(), 0);
    }
}
