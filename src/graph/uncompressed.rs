/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Simple on-disk representation of a graph that can be directly mapped
//! into memory.
//!
//! Format description:
//! - 8 bytes of fingerprint;
//! - 4 bytes holding the number of nodes N;
//! - N+1 8-byte integers holding the index of the first edge of the
//!   i-th adjacency list; the last one is the total number of edges M;
//! - M 4-byte integers holding the destination node of each edge,
//!   ascending within each adjacency list.
//!
//! All integers are little endian.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use memmap2::Mmap;

use crate::graph::AdjacencySource;

/// Fingerprint of the uncompressed graph format: the number of bytes
/// used for edge offsets followed by the number of bytes used for node
/// ids.
pub const FINGERPRINT: u64 =
    ((core::mem::size_of::<u64>() as u64) << 4) | core::mem::size_of::<u32>() as u64;

const HEADER_BYTES: usize = 12;

/// A memory-mapped uncompressed graph.
#[derive(Debug)]
pub struct UncompressedGraph {
    mmap: Mmap,
    num_nodes: usize,
}

impl UncompressedGraph {
    /// Map the given file and validate its fingerprint and size.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("cannot map {}", path.display()))?;
        ensure!(mmap.len() >= HEADER_BYTES, "truncated graph header");
        ensure!(
            read_u64(&mmap, 0) == FINGERPRINT,
            "invalid graph fingerprint"
        );
        let num_nodes = read_u32(&mmap, 8) as usize;
        ensure!(
            mmap.len() >= HEADER_BYTES + 8 * (num_nodes + 1),
            "truncated offset array"
        );
        let graph = Self { mmap, num_nodes };
        let num_edges = graph.offset(num_nodes);
        ensure!(
            graph.mmap.len() >= graph.neighbours_base() + 4 * num_edges,
            "truncated neighbour array"
        );
        for i in 0..num_nodes {
            ensure!(graph.offset(i) <= graph.offset(i + 1), "invalid offsets");
        }
        Ok(graph)
    }

    /// Total number of edges.
    pub fn num_edges(&self) -> usize {
        self.offset(self.num_nodes)
    }

    #[inline(always)]
    fn offset(&self, i: usize) -> usize {
        read_u64(&self.mmap, HEADER_BYTES + 8 * i) as usize
    }

    #[inline(always)]
    fn neighbours_base(&self) -> usize {
        HEADER_BYTES + 8 * (self.num_nodes + 1)
    }
}

impl AdjacencySource for UncompressedGraph {
    #[inline(always)]
    fn size(&self) -> usize {
        self.num_nodes
    }

    #[inline(always)]
    fn degree(&self, i: usize) -> usize {
        self.offset(i + 1) - self.offset(i)
    }

    #[inline(always)]
    fn neighbours(&self, i: usize) -> &[u32] {
        let start = self.offset(i);
        let end = self.offset(i + 1);
        let bytes = &self.mmap[self.neighbours_base() + 4 * start..];
        // The map is page-aligned and the neighbour area starts at a
        // multiple of 4.
        debug_assert_eq!(bytes.as_ptr() as usize % 4, 0);
        unsafe { core::slice::from_raw_parts(bytes.as_ptr() as *const u32, end - start) }
    }
}

#[inline(always)]
fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[inline(always)]
fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

/// Write a graph in the uncompressed container format.
pub fn store_graph(g: &impl AdjacencySource, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&FINGERPRINT.to_le_bytes())?;
    writer.write_all(&(g.size() as u32).to_le_bytes())?;
    let mut offset = 0u64;
    for i in 0..g.size() {
        writer.write_all(&offset.to_le_bytes())?;
        offset += g.degree(i) as u64;
    }
    writer.write_all(&offset.to_le_bytes())?;
    for i in 0..g.size() {
        for &succ in g.neighbours(i) {
            writer.write_all(&succ.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::VecGraph;

    #[test]
    fn test_fingerprint_value() {
        assert_eq!(FINGERPRINT, 0x84);
    }

    #[test]
    fn test_store_load() {
        let graph = VecGraph::new(vec![vec![0, 1], vec![1, 2], vec![], vec![0, 2, 3]]);
        let path = std::env::temp_dir().join("dsi-graph-codec-test-store-load.graph");
        store_graph(&graph, &path).unwrap();
        let loaded = UncompressedGraph::load(&path).unwrap();
        assert_eq!(loaded.size(), 4);
        assert_eq!(loaded.num_edges(), 7);
        for i in 0..graph.size() {
            assert_eq!(loaded.degree(i), graph.degree(i));
            assert_eq!(loaded.neighbours(i), graph.neighbours(i));
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_fingerprint_is_rejected() {
        let path = std::env::temp_dir().join("dsi-graph-codec-test-bad-fingerprint.graph");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(UncompressedGraph::load(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
