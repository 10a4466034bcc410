/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Random access to a compressed graph.
//!
//! Opening a stream runs one full streaming decode to record the bit
//! offset of every vertex's first token; queries then seek straight to
//! a vertex and replay only the degree/reference delta chain of its
//! chunk. [`neighbours`](CompressedGraph::neighbours) resolves
//! references recursively, which the encoder's chain-length bound keeps
//! shallow.
//!
//! Each query builds its own [`BitReader`] over the shared buffer and
//! mutates no state, so concurrent queries against the same instance
//! are safe. Queries panic on corrupt streams; all structural checks
//! of the streaming decoder run once at open time.

use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::codes::context::*;
use crate::codes::huffman::HuffmanReader;
use crate::codes::tokens::{unpack_signed, DefaultIntCoder};
use crate::graph::decode::decode_graph_indices;
use crate::impls::BitReader;

/// A compressed graph opened for random access.
#[derive(Debug)]
pub struct CompressedGraph {
    compressed: Vec<u8>,
    num_nodes: usize,
    node_start_indices: Vec<usize>,
    entropy: HuffmanReader,
}

impl CompressedGraph {
    /// Open a random-access compressed stream.
    pub fn new(compressed: Vec<u8>) -> Result<Self> {
        ensure!(!compressed.is_empty(), "empty stream");
        let mut reader = BitReader::new(&compressed);
        let num_nodes = reader.read(48) as usize;
        let allow_random_access = reader.read(1) != 0;
        ensure!(allow_random_access, "stream does not allow random access");
        let entropy = HuffmanReader::init(NUM_CONTEXTS, &mut reader)
            .context("invalid entropy header")?;
        let mut node_start_indices = Vec::with_capacity(num_nodes);
        decode_graph_indices(&compressed, Some(&mut node_start_indices), |_, _| {})
            .context("invalid graph")?;
        Ok(Self {
            compressed,
            num_nodes,
            node_start_indices,
            entropy,
        })
    }

    /// Read and open a compressed stream from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let compressed = std::fs::read(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::new(compressed)
    }

    /// Number of vertices.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.num_nodes
    }

    fn reader_at(&self, node: usize) -> BitReader<'_> {
        BitReader::new_at(&self.compressed, self.node_start_indices[node])
    }

    /// Decode the degree token of `node` in the given context.
    fn read_degree_bits(&self, node: usize, ctx: usize) -> u64 {
        let mut reader = self.reader_at(node);
        let mut entropy = &self.entropy;
        DefaultIntCoder::read(ctx, &mut reader, &mut entropy)
    }

    /// Decode the degree and reference tokens of `node`. The reference
    /// is meaningful only for nodes of nonzero degree.
    fn read_degree_and_ref_bits(&self, node: usize, ctx: usize, last_reference: usize) -> (u64, usize) {
        let mut reader = self.reader_at(node);
        let mut entropy = &self.entropy;
        let degree_delta = DefaultIntCoder::read(ctx, &mut reader, &mut entropy);
        let mut reference = 0;
        if node != 0 {
            reference = DefaultIntCoder::read(
                reference_context(last_reference),
                &mut reader,
                &mut entropy,
            ) as usize;
        }
        (degree_delta, reference)
    }

    /// Out-degree of `node`, replaying the degree delta chain of its
    /// chunk.
    pub fn degree(&self, node: usize) -> usize {
        let first_node_in_chunk = node - node % DEGREE_REFERENCE_CHUNK_SIZE;
        let mut last_degree_delta = self.read_degree_bits(first_node_in_chunk, FIRST_DEGREE_CONTEXT);
        let mut degree = last_degree_delta as i64;
        for cur in first_node_in_chunk + 1..=node {
            let ctx = degree_context(last_degree_delta);
            last_degree_delta = self.read_degree_bits(cur, ctx);
            degree += unpack_signed(last_degree_delta);
        }
        assert!(degree >= 0 && degree <= self.num_nodes as i64, "invalid degree");
        degree as usize
    }

    /// Successors of `node`, ascending.
    pub fn neighbours(&self, node: usize) -> Vec<u32> {
        let mut reader = self.reader_at(node);
        let mut entropy = &self.entropy;

        // Replay the degree/reference chain of the chunk up to `node`.
        let first_node_in_chunk = node - node % DEGREE_REFERENCE_CHUNK_SIZE;
        let mut degree;
        let mut reference = 0;
        let mut last_reference = 0;
        if first_node_in_chunk != node {
            let (mut last_degree_delta, r) = self.read_degree_and_ref_bits(
                first_node_in_chunk,
                FIRST_DEGREE_CONTEXT,
                last_reference,
            );
            degree = last_degree_delta as i64;
            if degree != 0 {
                last_reference = r;
            }
            for cur in first_node_in_chunk + 1..node {
                let ctx = degree_context(last_degree_delta);
                let (delta, r) = self.read_degree_and_ref_bits(cur, ctx, last_reference);
                last_degree_delta = delta;
                degree += unpack_signed(delta);
                if degree != 0 {
                    last_reference = r;
                }
            }
            let ctx = degree_context(last_degree_delta);
            degree += unpack_signed(DefaultIntCoder::read(ctx, &mut reader, &mut entropy));
        } else {
            degree = DefaultIntCoder::read(FIRST_DEGREE_CONTEXT, &mut reader, &mut entropy) as i64;
        }

        if degree == 0 {
            return Vec::new();
        }
        if node != 0 {
            reference = DefaultIntCoder::read(
                reference_context(last_reference),
                &mut reader,
                &mut entropy,
            ) as usize;
        }
        assert!(degree >= 0 && degree <= self.num_nodes as i64, "invalid degree");
        assert!(reference <= node, "invalid reference");
        let degree = degree as usize;

        // If a reference is used, resolve it recursively and read the
        // list of blocks of (alternating) copied and skipped edges.
        let mut ref_list = Vec::new();
        let mut blocks: Vec<usize> = Vec::new();
        let mut num_to_copy = 0;
        if reference != 0 {
            ref_list = self.neighbours(node - reference);
            let block_count =
                DefaultIntCoder::read(BLOCK_COUNT_CONTEXT, &mut reader, &mut entropy) as usize;
            assert!(block_count <= ref_list.len() + 1, "invalid block count");
            let mut block_end = 0;
            for j in 0..block_count {
                let ctx = if j == 0 {
                    BLOCK_CONTEXT
                } else if j % 2 == 0 {
                    BLOCK_CONTEXT_EVEN
                } else {
                    BLOCK_CONTEXT_ODD
                };
                let mut block = DefaultIntCoder::read(ctx, &mut reader, &mut entropy) as usize;
                if j != 0 {
                    block += 1;
                }
                block_end += block;
                blocks.push(block);
            }
            assert!(block_end <= ref_list.len(), "invalid block copy pattern");
            // The last block is implicit and goes to the end of the
            // reference list.
            blocks.push(ref_list.len() - block_end);
            // Blocks in even positions are to be copied.
            for j in (0..blocks.len()).step_by(2) {
                num_to_copy += blocks[j];
            }
        }
        assert!(num_to_copy <= degree, "invalid block copy pattern");

        // Merge the residuals read from the bitstream with the copied
        // blocks, as in the streaming decoder.
        let mut neighbours = Vec::with_capacity(degree);
        let num_residuals = degree - num_to_copy;
        let mut next_dest = node as i64;
        let mut last_delta = 0;
        let mut ref_pos = 0;
        let mut to_copy = blocks.first().copied().unwrap_or(0);
        let mut next_block = 1;
        if to_copy == 0 && blocks.len() > 2 {
            ref_pos = blocks[1];
            to_copy = blocks[2];
            next_block = 3;
        }
        let mut zero_run = 0;
        let mut rle_zeros = 0;

        for j in 0..num_residuals {
            let mut dest;
            if j == 0 {
                last_delta = DefaultIntCoder::read(
                    first_residual_context(num_residuals as u64),
                    &mut reader,
                    &mut entropy,
                );
                dest = node as i64 + unpack_signed(last_delta);
            } else if rle_zeros > 0 {
                last_delta = 0;
                dest = next_dest;
            } else {
                last_delta = DefaultIntCoder::read(
                    residual_context(last_delta),
                    &mut reader,
                    &mut entropy,
                );
                dest = next_dest + last_delta as i64;
            }
            if last_delta == 0 && rle_zeros == 0 {
                zero_run += 1;
            } else {
                zero_run = 0;
            }
            if rle_zeros > 0 {
                rle_zeros -= 1;
            }
            while to_copy > 0 && (ref_list[ref_pos] as i64) <= dest {
                to_copy -= 1;
                neighbours.push(ref_list[ref_pos]);
                if j != 0 && ref_list[ref_pos] as i64 >= next_dest {
                    dest += 1;
                }
                ref_pos += 1;
                if to_copy == 0 && next_block + 1 < blocks.len() {
                    ref_pos += blocks[next_block];
                    to_copy = blocks[next_block + 1];
                    next_block += 2;
                }
            }
            if zero_run >= RLE_MIN {
                rle_zeros =
                    DefaultIntCoder::read(RLE_CONTEXT, &mut reader, &mut entropy) as usize;
                zero_run = 0;
            }
            assert!(
                dest >= 0 && dest < self.num_nodes as i64,
                "invalid residual"
            );
            neighbours.push(dest as u32);
            next_dest = dest + 1;
        }
        debug_assert!(ref_pos + to_copy <= ref_list.len());
        while to_copy > 0 {
            to_copy -= 1;
            neighbours.push(ref_list[ref_pos]);
            ref_pos += 1;
            if to_copy == 0 && next_block + 1 < blocks.len() {
                ref_pos += blocks[next_block];
                to_copy = blocks[next_block + 1];
                next_block += 2;
            }
        }
        neighbours
    }
}
