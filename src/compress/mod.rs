//! Offline compression pipeline.
//!
//! Turns the `<name>.nodes.csv.gz` / `<name>.edges.csv.gz` pair into the
//! full artifact set the runtime store mmaps: minimal perfect hash,
//! BFS-permuted forward and transposed compressed graphs, identifier maps,
//! the packed node-type table, and a small stats file.
//!
//! The pipeline is a fixed sequence of restartable stages communicating only
//! through files, so any contiguous subset can be re-run. Every stage writes
//! to temporary names and renames into place on success; a failed stage
//! fails the build.

mod arcs;
mod bfs;

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use flate2::read::GzDecoder;
use tracing::info;

use crate::error::{GraphError, Result};
use crate::graph::bvgraph::{
    BvGraph, GRAPH_EXT, OFFSETS_EXT, OFFSETS_TABLE_EXT, PROPERTIES_EXT,
};
use crate::maps::{
    write_pid_to_node_line, TypeMapBuilder, MPH_EXT, NODE_TO_PID_EXT, NODE_TO_PID_LINE_LEN,
    NODE_TO_TYPE_EXT, ORDER_EXT, PID_TO_NODE_EXT,
};
use crate::mph::Mph;
use crate::pid::{NodeType, Pid, PID_STR_LEN};
use crate::properties::format_stats;
use crate::util::{persist, suffix_path};

use arcs::{write_graph_from_sorted_pairs, PairSorter};

pub const STATS_EXT: &str = ".stats";

const GRAPH_FILE_EXTS: [&str; 4] = [GRAPH_EXT, OFFSETS_EXT, OFFSETS_TABLE_EXT, PROPERTIES_EXT];

/// One stage of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompressionStep {
    /// Build the minimal perfect hash over the node PIDs.
    Mph,
    /// Compress the edge stream into the hash-ordered graph.
    Bv,
    /// Compute the BFS permutation over the symmetrized graph.
    Bfs,
    /// Apply the permutation to produce the final forward graph.
    Permute,
    /// Transpose the permuted graph.
    Transpose,
    /// Write node/arc counts per type.
    Stats,
    /// Write the PID maps and the packed node-type table.
    Maps,
    /// Remove intermediate artifacts and the temp directory.
    CleanTmp,
}

/// Every step, in the order the pipeline runs them.
pub const COMP_SEQ: [CompressionStep; 8] = [
    CompressionStep::Mph,
    CompressionStep::Bv,
    CompressionStep::Bfs,
    CompressionStep::Permute,
    CompressionStep::Transpose,
    CompressionStep::Stats,
    CompressionStep::Maps,
    CompressionStep::CleanTmp,
];

impl fmt::Display for CompressionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionStep::Mph => "mph",
            CompressionStep::Bv => "bv",
            CompressionStep::Bfs => "bfs",
            CompressionStep::Permute => "permute",
            CompressionStep::Transpose => "transpose",
            CompressionStep::Stats => "stats",
            CompressionStep::Maps => "maps",
            CompressionStep::CleanTmp => "clean_tmp",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionStep {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<CompressionStep> {
        match s {
            "mph" => Ok(CompressionStep::Mph),
            "bv" => Ok(CompressionStep::Bv),
            "bfs" => Ok(CompressionStep::Bfs),
            "permute" => Ok(CompressionStep::Permute),
            "transpose" => Ok(CompressionStep::Transpose),
            "stats" => Ok(CompressionStep::Stats),
            "maps" => Ok(CompressionStep::Maps),
            "clean_tmp" => Ok(CompressionStep::CleanTmp),
            _ => Err(GraphError::BadSpec(format!("compression step '{s}'"))),
        }
    }
}

/// Parses a step selection: comma-separated step names or `a-b` ranges with
/// optional open endpoints, e.g. `"mph,bv"`, `"bfs-maps"`, `"-permute"`.
pub fn parse_steps(spec: &str) -> Result<BTreeSet<CompressionStep>> {
    let mut steps = BTreeSet::new();
    for token in spec.split(',') {
        let token = token.trim();
        if let Some((left, right)) = token.split_once('-') {
            let from = if left.is_empty() {
                0
            } else {
                step_index(left.parse()?)
            };
            let to = if right.is_empty() {
                COMP_SEQ.len() - 1
            } else {
                step_index(right.parse()?)
            };
            if from > to {
                return Err(GraphError::BadSpec(format!("step range '{token}'")));
            }
            steps.extend(COMP_SEQ[from..=to].iter().copied());
        } else {
            steps.insert(token.parse()?);
        }
    }
    Ok(steps)
}

fn step_index(step: CompressionStep) -> usize {
    COMP_SEQ
        .iter()
        .position(|&s| s == step)
        .expect("step is in COMP_SEQ")
}

/// Pipeline configuration.
#[derive(Clone)]
pub struct CompressConfig {
    /// Arc pairs held in memory before a sorted run is spilled.
    pub batch_size: usize,
    /// Scratch directory; defaults to `<out_dir>/tmp`.
    pub temp_dir: Option<PathBuf>,
    /// Stages to run; empty means the full sequence.
    pub steps: BTreeSet<CompressionStep>,
}

impl Default for CompressConfig {
    fn default() -> CompressConfig {
        CompressConfig {
            batch_size: 1 << 22,
            temp_dir: None,
            steps: BTreeSet::new(),
        }
    }
}

struct Pipeline<'a> {
    name: &'a str,
    in_dir: &'a Path,
    out_dir: &'a Path,
    tmp_dir: PathBuf,
    batch_size: usize,
}

/// Runs the compression pipeline. All-or-nothing: the first failing stage
/// aborts the build with its error.
pub fn compress(
    name: &str,
    in_dir: &Path,
    out_dir: &Path,
    config: &CompressConfig,
) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let tmp_dir = config
        .temp_dir
        .clone()
        .unwrap_or_else(|| out_dir.join("tmp"));
    fs::create_dir_all(&tmp_dir)?;

    let pipeline = Pipeline {
        name,
        in_dir,
        out_dir,
        tmp_dir,
        batch_size: config.batch_size,
    };

    let selected: Vec<CompressionStep> = COMP_SEQ
        .iter()
        .copied()
        .filter(|step| config.steps.is_empty() || config.steps.contains(step))
        .collect();

    let start = Instant::now();
    info!(graph = name, steps = selected.len(), "compress.start");
    for (index, step) in selected.iter().enumerate() {
        let step_start = Instant::now();
        info!(step = %step, seq = index + 1, total = selected.len(), "compress.step.start");
        pipeline.run(*step)?;
        info!(
            step = %step,
            elapsed_ms = step_start.elapsed().as_millis() as u64,
            "compress.step.done"
        );
    }
    info!(
        graph = name,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "compress.done"
    );
    Ok(())
}

impl Pipeline<'_> {
    fn run(&self, step: CompressionStep) -> Result<()> {
        match step {
            CompressionStep::Mph => self.step_mph(),
            CompressionStep::Bv => self.step_bv(),
            CompressionStep::Bfs => self.step_bfs(),
            CompressionStep::Permute => self.step_permute(),
            CompressionStep::Transpose => self.step_transpose(),
            CompressionStep::Stats => self.step_stats(),
            CompressionStep::Maps => self.step_maps(),
            CompressionStep::CleanTmp => self.step_clean_tmp(),
        }
    }

    fn base(&self) -> PathBuf {
        self.out_dir.join(self.name)
    }

    fn bv_base(&self) -> PathBuf {
        self.out_dir.join(format!("{}-bv", self.name))
    }

    fn nodes_csv(&self) -> PathBuf {
        self.in_dir.join(format!("{}.nodes.csv.gz", self.name))
    }

    fn edges_csv(&self) -> PathBuf {
        self.in_dir.join(format!("{}.edges.csv.gz", self.name))
    }

    fn step_mph(&self) -> Result<()> {
        let mut keys: Vec<[u8; PID_STR_LEN]> = Vec::new();
        let mut previous: Option<[u8; PID_STR_LEN]> = None;
        for line in gz_lines(&self.nodes_csv())? {
            let line = line?;
            let key = node_line(&line)?;
            if previous.is_some_and(|p| p >= key) {
                return Err(GraphError::Compression(format!(
                    "{}: node list is not sorted and unique around {}",
                    self.nodes_csv().display(),
                    String::from_utf8_lossy(&key)
                )));
            }
            previous = Some(key);
            keys.push(key);
        }
        let mph = Mph::build(&keys)?;
        let target = suffix_path(&self.base(), MPH_EXT);
        let tmp = suffix_path(&target, ".tmp");
        mph.store(&tmp)?;
        persist(&tmp, &target)?;
        info!(keys = keys.len(), "compress.mph.done");
        Ok(())
    }

    fn step_bv(&self) -> Result<()> {
        let mph = Mph::load(&suffix_path(&self.base(), MPH_EXT))?;
        let num_nodes = mph.num_keys();
        let mut sorter = PairSorter::new(self.batch_size, &self.tmp_dir);
        let mut arcs = 0u64;
        for line in gz_lines(&self.edges_csv())? {
            let line = line?;
            let (src, dst) = edge_line(&line)?;
            sorter.push(mph.get(&src), mph.get(&dst))?;
            arcs += 1;
        }
        self.write_graph(&self.bv_base(), num_nodes, sorter)?;
        info!(nodes = num_nodes, arcs, "compress.bv.done");
        Ok(())
    }

    fn step_bfs(&self) -> Result<()> {
        let forward = BvGraph::load(&self.bv_base())?;
        let transposed_base = self.tmp_dir.join("bv-transposed");
        transpose_graph(&forward, &transposed_base, self.batch_size, &self.tmp_dir)?;
        let transposed = BvGraph::load(&transposed_base)?;

        let order = bfs::bfs_order(&forward, &transposed)?;
        let target = suffix_path(&self.base(), ORDER_EXT);
        let tmp = suffix_path(&target, ".tmp");
        let mut out = BufWriter::new(File::create(&tmp)?);
        for &ordinal in &order {
            out.write_all(&ordinal.to_be_bytes())?;
        }
        out.flush()?;
        drop(out);
        persist(&tmp, &target)?;
        info!(nodes = order.len(), "compress.bfs.done");
        Ok(())
    }

    fn step_permute(&self) -> Result<()> {
        let graph = BvGraph::load(&self.bv_base())?;
        let order = read_order(&suffix_path(&self.base(), ORDER_EXT), graph.num_nodes())?;
        let mut sorter = PairSorter::new(self.batch_size, &self.tmp_dir);
        for node in 0..graph.num_nodes() {
            for succ in graph.successors(node)? {
                sorter.push(order[node as usize], order[succ as usize])?;
            }
        }
        let (nodes, arcs) = self.write_graph(&self.base(), graph.num_nodes(), sorter)?;
        info!(nodes, arcs, "compress.permute.done");
        Ok(())
    }

    fn step_transpose(&self) -> Result<()> {
        let graph = BvGraph::load(&self.base())?;
        let target = suffix_path(&self.base(), "-transposed");
        let (nodes, arcs) =
            transpose_graph(&graph, &target, self.batch_size, &self.tmp_dir)?;
        info!(nodes, arcs, "compress.transpose.done");
        Ok(())
    }

    fn step_stats(&self) -> Result<()> {
        let graph = BvGraph::load(&self.base())?;
        let mut per_type = [0u64; NodeType::COUNT];
        for line in gz_lines(&self.nodes_csv())? {
            let line = line?;
            let key = node_line(&line)?;
            let pid = Pid::parse(&key)?;
            per_type[pid.node_type.ordinal() as usize] += 1;
        }
        let target = suffix_path(&self.base(), STATS_EXT);
        let tmp = suffix_path(&target, ".tmp");
        fs::write(
            &tmp,
            format_stats(graph.num_nodes(), graph.num_arcs(), &per_type),
        )?;
        persist(&tmp, &target)?;
        Ok(())
    }

    fn step_maps(&self) -> Result<()> {
        let mph = Mph::load(&suffix_path(&self.base(), MPH_EXT))?;
        let num_nodes = mph.num_keys();
        let order = read_order(&suffix_path(&self.base(), ORDER_EXT), num_nodes)?;

        let pid_to_node_target = suffix_path(&self.base(), PID_TO_NODE_EXT);
        let pid_to_node_tmp = suffix_path(&pid_to_node_target, ".tmp");
        let mut pid_to_node = BufWriter::new(File::create(&pid_to_node_tmp)?);

        // node2pid needs lines in id order while the input arrives in PID
        // order, so assemble it in memory.
        let mut node_to_pid = vec![0u8; num_nodes as usize * NODE_TO_PID_LINE_LEN];
        let mut types = TypeMapBuilder::new(num_nodes);
        let mut lines = 0u64;
        for line in gz_lines(&self.nodes_csv())? {
            let line = line?;
            let key = node_line(&line)?;
            let pid = Pid::parse(&key)?;
            let id = order[mph.get(&key) as usize];
            if id >= num_nodes {
                return Err(GraphError::Compression(format!(
                    "permutation maps {} outside the id space",
                    String::from_utf8_lossy(&key)
                )));
            }
            write_pid_to_node_line(&mut pid_to_node, &pid, id)?;
            let record = &mut node_to_pid
                [id as usize * NODE_TO_PID_LINE_LEN..(id as usize + 1) * NODE_TO_PID_LINE_LEN];
            record[..PID_STR_LEN].copy_from_slice(&key);
            record[PID_STR_LEN] = b'\n';
            types.set(id, pid.node_type)?;
            lines += 1;
        }
        if lines != num_nodes {
            return Err(GraphError::Compression(format!(
                "node list shrank to {lines} lines, hash covers {num_nodes} keys"
            )));
        }
        pid_to_node.flush()?;
        drop(pid_to_node);
        persist(&pid_to_node_tmp, &pid_to_node_target)?;

        let node_to_pid_target = suffix_path(&self.base(), NODE_TO_PID_EXT);
        let node_to_pid_tmp = suffix_path(&node_to_pid_target, ".tmp");
        fs::write(&node_to_pid_tmp, &node_to_pid)?;
        persist(&node_to_pid_tmp, &node_to_pid_target)?;

        let types_target = suffix_path(&self.base(), NODE_TO_TYPE_EXT);
        let types_tmp = suffix_path(&types_target, ".tmp");
        types.store(&types_tmp)?;
        persist(&types_tmp, &types_target)?;
        info!(nodes = num_nodes, "compress.maps.done");
        Ok(())
    }

    fn step_clean_tmp(&self) -> Result<()> {
        for ext in GRAPH_FILE_EXTS {
            let _ = fs::remove_file(suffix_path(&self.bv_base(), ext));
        }
        let _ = fs::remove_dir_all(&self.tmp_dir);
        Ok(())
    }

    /// Writes the four graph files through temporary names.
    fn write_graph(
        &self,
        base: &Path,
        num_nodes: u64,
        sorter: PairSorter,
    ) -> Result<(u64, u64)> {
        let tmp_base = suffix_path(base, ".tmp");
        let counts =
            write_graph_from_sorted_pairs(&tmp_base, num_nodes, sorter.into_sorted()?)?;
        for ext in GRAPH_FILE_EXTS {
            persist(&suffix_path(&tmp_base, ext), &suffix_path(base, ext))?;
        }
        Ok(counts)
    }
}

fn transpose_graph(
    graph: &BvGraph,
    target: &Path,
    batch_size: usize,
    tmp_dir: &Path,
) -> Result<(u64, u64)> {
    let mut sorter = PairSorter::new(batch_size, tmp_dir);
    for node in 0..graph.num_nodes() {
        for succ in graph.successors(node)? {
            sorter.push(succ, node)?;
        }
    }
    let tmp_base = suffix_path(target, ".tmp");
    let counts =
        write_graph_from_sorted_pairs(&tmp_base, graph.num_nodes(), sorter.into_sorted()?)?;
    for ext in GRAPH_FILE_EXTS {
        persist(&suffix_path(&tmp_base, ext), &suffix_path(target, ext))?;
    }
    Ok(counts)
}

fn read_order(path: &Path, num_nodes: u64) -> Result<Vec<u64>> {
    let bytes = fs::read(path)?;
    if bytes.len() as u64 != num_nodes * 8 {
        return Err(GraphError::ArtifactCorrupt(format!(
            "{}: {} bytes for {num_nodes} nodes",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_be_bytes(chunk.try_into().expect("chunk is 8 bytes")))
        .collect())
}

fn node_line(line: &[u8]) -> Result<[u8; PID_STR_LEN]> {
    line.try_into().map_err(|_| {
        GraphError::Compression(format!(
            "node line '{}' is not a {PID_STR_LEN}-byte pid",
            String::from_utf8_lossy(line)
        ))
    })
}

fn edge_line(line: &[u8]) -> Result<([u8; PID_STR_LEN], [u8; PID_STR_LEN])> {
    if line.len() != PID_STR_LEN * 2 + 1 || line[PID_STR_LEN] != b' ' {
        return Err(GraphError::Compression(format!(
            "edge line '{}' is not two space-separated pids",
            String::from_utf8_lossy(line)
        )));
    }
    let src = line[..PID_STR_LEN].try_into().expect("checked length");
    let dst = line[PID_STR_LEN + 1..].try_into().expect("checked length");
    // Reject lines that are not syntactically valid PIDs up front.
    Pid::parse(&line[..PID_STR_LEN])?;
    Pid::parse(&line[PID_STR_LEN + 1..])?;
    Ok((src, dst))
}

/// Iterates the LF-terminated lines of a gzip-compressed file.
fn gz_lines(path: &Path) -> Result<impl Iterator<Item = Result<Vec<u8>>>> {
    let file = File::open(path).map_err(|e| {
        GraphError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })?;
    let mut reader = BufReader::new(GzDecoder::new(file));
    Ok(std::iter::from_fn(move || {
        let mut line = Vec::with_capacity(PID_STR_LEN + 2);
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(e) => Some(Err(GraphError::Io(e))),
        }
    }))
}
