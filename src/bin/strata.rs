use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata::compress::{compress, parse_steps, CompressConfig, STATS_EXT};
use strata::traversal::{self, Direction, OutputFormat, VisitOptions};
use strata::{GraphStore, NodeType, Pid, Result};

#[derive(Parser)]
#[command(name = "strata", version, about = "Compressed archive graph toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the compression pipeline from CSV inputs to graph artifacts.
    Compress {
        /// Graph base name, shared by inputs and outputs.
        name: String,
        /// Directory holding <name>.nodes.csv.gz and <name>.edges.csv.gz.
        in_dir: PathBuf,
        /// Directory receiving the compressed artifacts.
        out_dir: PathBuf,
        /// Steps to run: names, comma lists, or ranges such as "bfs-maps".
        #[arg(long)]
        steps: Option<String>,
        /// Arc pairs sorted in memory per spilled run.
        #[arg(long, default_value_t = 1 << 22)]
        batch_size: usize,
        /// Scratch directory, defaults to <out_dir>/tmp.
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },
    /// Print artifact metadata for a compressed graph.
    Inspect {
        /// Path and basename of the compressed graph.
        graph: PathBuf,
    },
    /// Enumerate the reachable set (and optionally paths) from a node.
    Visit {
        graph: PathBuf,
        /// Source node as a persistent identifier.
        src: String,
        #[arg(long, default_value = "forward")]
        direction: String,
        /// Allowed edges, e.g. "rev:dir,dir:cnt" or "*:*".
        #[arg(long, default_value = "*:*")]
        edges: String,
        /// Output: "nodes", "paths", or "nodes+paths".
        #[arg(long, default_value = "nodes")]
        output: String,
        /// Depth cap for the path-producing outputs.
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// List the filtered one-hop neighbors of a node.
    Neighbors {
        graph: PathBuf,
        src: String,
        #[arg(long, default_value = "forward")]
        direction: String,
        #[arg(long, default_value = "*:*")]
        edges: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Compress {
            name,
            in_dir,
            out_dir,
            steps,
            batch_size,
            temp_dir,
        } => {
            let config = CompressConfig {
                batch_size,
                temp_dir,
                steps: match steps {
                    Some(spec) => parse_steps(&spec)?,
                    None => Default::default(),
                },
            };
            compress(&name, &in_dir, &out_dir, &config)
        }
        Command::Inspect { graph } => cmd_inspect(&graph),
        Command::Visit {
            graph,
            src,
            direction,
            edges,
            output,
            max_depth,
        } => {
            let store = GraphStore::open(&graph)?;
            let src: Pid = src.parse()?;
            let direction: Direction = direction.parse()?;
            let output: OutputFormat = output.parse()?;
            let options = VisitOptions {
                max_depth,
                cancel: None,
            };
            let outcome = traversal::visit(&store, &src, direction, &edges, output, &options)?;
            if output == OutputFormat::Paths {
                for path in &outcome.paths {
                    println!("{}", join_path(path));
                }
            } else {
                for node in &outcome.nodes {
                    println!("{node}");
                }
                for path in &outcome.paths {
                    println!("{}", join_path(path));
                }
            }
            Ok(())
        }
        Command::Neighbors {
            graph,
            src,
            direction,
            edges,
        } => {
            let store = GraphStore::open(&graph)?;
            let src: Pid = src.parse()?;
            let direction: Direction = direction.parse()?;
            for pid in traversal::neighbors(&store, &src, direction, &edges)? {
                println!("{pid}");
            }
            Ok(())
        }
    }
}

fn cmd_inspect(graph: &PathBuf) -> Result<()> {
    let store = GraphStore::open(graph)?;
    println!("graph: {}", graph.display());
    println!("nodes: {}", store.num_nodes());
    println!("arcs: {}", store.num_arcs());

    let stats_path = {
        let mut name = graph
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(STATS_EXT);
        graph.with_file_name(name)
    };
    if let Ok(text) = std::fs::read_to_string(&stats_path) {
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                if let Some(token) = key.strip_prefix("nodes.") {
                    println!("nodes[{token}]: {value}");
                }
            }
        }
    } else {
        // No stats artifact; derive the per-type counts from the type table.
        let mut per_type = [0u64; NodeType::COUNT];
        for id in 0..store.num_nodes() {
            per_type[store.node_type(id)?.ordinal() as usize] += 1;
        }
        for node_type in NodeType::all() {
            println!(
                "nodes[{node_type}]: {}",
                per_type[node_type.ordinal() as usize]
            );
        }
    }
    Ok(())
}

fn join_path(path: &[Pid]) -> String {
    path.iter()
        .map(Pid::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
