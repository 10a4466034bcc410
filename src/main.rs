/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use dsi_graph_codec::prelude::*;

#[derive(Parser, Debug)]
#[command(about = "Compress, decompress, and traverse adjacency-list graphs", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress an uncompressed graph file.
    Encode {
        /// Input file, in the uncompressed container format.
        input: PathBuf,
        /// Output file for the compressed stream.
        output: PathBuf,
        /// Produce a stream supporting per-vertex random access.
        #[arg(long)]
        allow_random_access: bool,
    },
    /// Decompress a stream, verifying it and reporting its checksum.
    Decode {
        /// Input file, as produced by `encode`.
        input: PathBuf,
    },
    /// Breadth-first traversal of the whole graph.
    Bfs {
        /// Input file: uncompressed, or compressed with random access.
        input: PathBuf,
        /// Treat the input as a compressed stream.
        #[arg(long)]
        compressed: bool,
    },
    /// Depth-first traversal of the whole graph.
    Dfs {
        /// Input file: uncompressed, or compressed with random access.
        input: PathBuf,
        /// Treat the input as a compressed stream.
        #[arg(long)]
        compressed: bool,
    },
}

fn traverse(
    input: &PathBuf,
    compressed: bool,
    traversal: impl Fn(usize, &mut dyn FnMut(usize) -> Vec<u32>) -> usize,
) -> Result<()> {
    let start = Instant::now();
    let num_visited;
    let num_nodes;
    if compressed {
        let graph = CompressedGraph::load(input)?;
        num_nodes = graph.size();
        num_visited = traversal(num_nodes, &mut |i| graph.neighbours(i));
    } else {
        let graph = UncompressedGraph::load(input)?;
        num_nodes = graph.size();
        num_visited = traversal(num_nodes, &mut |i| graph.neighbours(i).to_vec());
    }
    info!(
        num_nodes,
        num_visited,
        "traversal took {:.2} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    match args.command {
        Command::Encode {
            input,
            output,
            allow_random_access,
        } => {
            let graph = UncompressedGraph::load(&input)?;
            let data = encode_graph(&graph, allow_random_access);
            std::fs::write(&output, data)
                .with_context(|| format!("cannot write {}", output.display()))?;
        }
        Command::Decode { input } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("cannot read {}", input.display()))?;
            let mut edges = 0u64;
            let mut chksum = 0u64;
            let start = Instant::now();
            let num_nodes = decode_graph(&data, |node, succ| {
                edges += 1;
                chksum = checksum(chksum, node as u64, succ as u64);
            })?;
            info!(
                "decompressed {} nodes, {} edges in {:.2} ms, checksum {:x}",
                num_nodes,
                edges,
                start.elapsed().as_secs_f64() * 1000.0,
                chksum
            );
        }
        Command::Bfs { input, compressed } => {
            traverse(&input, compressed, |n, successors| bfs(n, successors))?;
        }
        Command::Dfs { input, compressed } => {
            traverse(&input, compressed, |n, successors| dfs(n, successors))?;
        }
    }
    Ok(())
}
