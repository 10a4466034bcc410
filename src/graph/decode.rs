/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The streaming graph decoder.
//!
//! Adjacency lists are reconstructed in vertex order, keeping a ring of
//! the last [`NUM_ADJ_LISTS`] lists as reference candidates. Every
//! structural claim of the stream is validated: claimed degrees and
//! neighbour ids must not exceed the number of nodes, references must
//! not leave the ring, block copies must fit the reference list, and —
//! for ANS streams — the entropy state must come back to its signature
//! after the last symbol.

use anyhow::{ensure, Context, Result};
use tracing::info;

use crate::codes::ans::AnsReader;
use crate::codes::context::*;
use crate::codes::huffman::HuffmanReader;
use crate::codes::tokens::{unpack_signed, DefaultIntCoder};
use crate::codes::EntropyRead;
use crate::graph::VecGraph;
use crate::impls::BitReader;
use crate::utils::checksum;

/// Mutable view of the current list and shared view of the reference
/// list, which live in the same ring.
fn ring_pair(ring: &mut [Vec<u32>], cur: usize, reference: usize) -> (&mut Vec<u32>, &[u32]) {
    if reference == 0 {
        return (&mut ring[cur], &[]);
    }
    let ref_id = (cur + ring.len() - reference % ring.len()) % ring.len();
    debug_assert_ne!(ref_id, cur);
    if cur < ref_id {
        let (left, right) = ring.split_at_mut(ref_id);
        (&mut left[cur], &right[0])
    } else {
        let (left, right) = ring.split_at_mut(cur);
        (&mut right[0], &left[ref_id])
    }
}

fn decode_graph_impl<R: EntropyRead>(
    n: usize,
    allow_random_access: bool,
    entropy: &mut R,
    reader: &mut BitReader,
    mut node_starts: Option<&mut Vec<usize>>,
    mut edge_cb: impl FnMut(u32, u32),
) -> Result<()> {
    // Storage for the previous up-to-NUM_ADJ_LISTS lists to be used as
    // references.
    let num_lists = NUM_ADJ_LISTS.min(n.max(1));
    let mut ring: Vec<Vec<u32>> = vec![Vec::new(); num_lists];
    let mut blocks: Vec<usize> = Vec::new();
    let rle_min = if allow_random_access {
        RLE_MIN
    } else {
        usize::MAX
    };
    // The state below restarts every DEGREE_REFERENCE_CHUNK_SIZE
    // vertices in random-access mode.
    //
    // Previous degree, for degree delta coding.
    let mut prev_degree = 0i64;
    // Previous degree delta, for context modeling.
    let mut last_degree_delta = 0;
    // Previous reference offset, for context modeling.
    let mut last_reference = 0;

    for i in 0..n {
        if let Some(starts) = node_starts.as_deref_mut() {
            starts.push(reader.bit_position());
        }
        let i_mod = i % num_lists;
        ring[i_mod].clear();
        blocks.clear();

        let degree;
        if (allow_random_access && i % DEGREE_REFERENCE_CHUNK_SIZE == 0) || i == 0 {
            last_degree_delta = DefaultIntCoder::read(FIRST_DEGREE_CONTEXT, reader, entropy);
            degree = last_degree_delta as i64;
            last_reference = 0;
        } else {
            let ctx = degree_context(last_degree_delta);
            last_degree_delta = DefaultIntCoder::read(ctx, reader, entropy);
            degree = prev_degree + unpack_signed(last_degree_delta);
        }
        prev_degree = degree;
        ensure!(degree >= 0 && degree <= n as i64, "invalid degree");
        let degree = degree as usize;
        if degree == 0 {
            continue;
        }

        // If this is not the first node, read the offset of the list to
        // be used as a reference.
        let mut reference = 0;
        if i != 0 {
            reference =
                DefaultIntCoder::read(reference_context(last_reference), reader, entropy) as usize;
            last_reference = reference;
        }
        ensure!(reference <= i && reference < NUM_ADJ_LISTS, "invalid reference");

        let (cur_list, ref_list) = ring_pair(&mut ring, i_mod, reference);

        // If a reference is used, read the list of blocks of
        // (alternating) copied and skipped edges.
        let mut num_to_copy = 0;
        if reference != 0 {
            let block_count = DefaultIntCoder::read(BLOCK_COUNT_CONTEXT, reader, entropy) as usize;
            ensure!(block_count <= ref_list.len() + 1, "invalid block count");
            let mut pos = 0;
            for j in 0..block_count {
                let ctx = if j == 0 {
                    BLOCK_CONTEXT
                } else if j % 2 == 0 {
                    BLOCK_CONTEXT_EVEN
                } else {
                    BLOCK_CONTEXT_ODD
                };
                let mut block = DefaultIntCoder::read(ctx, reader, entropy) as usize;
                if j != 0 {
                    block += 1;
                }
                pos += block;
                blocks.push(block);
            }
            ensure!(pos <= ref_list.len(), "invalid block copy pattern");
            // The last block is implicit and goes to the end of the
            // reference list.
            blocks.push(ref_list.len() - pos);
            // Blocks in even positions are to be copied.
            for j in (0..blocks.len()).step_by(2) {
                num_to_copy += blocks[j];
            }
        }
        ensure!(num_to_copy <= degree, "invalid block copy pattern");

        // Read all the edges that are not copied, merging them with the
        // blocks copied from the reference list.

        // Number of edges to read from the bitstream.
        let num_residuals = degree - num_to_copy;
        // Destination of the previous residual, plus one.
        let mut next_dest = i as i64;
        // Previous residual delta, for context modeling.
        let mut last_delta = 0;
        // Current position in the reference list.
        let mut ref_pos = 0;
        // Number of nodes of the current block still to be copied.
        let mut to_copy = blocks.first().copied().unwrap_or(0);
        // Index of the next block.
        let mut next_block = 1;
        // If nothing is to be copied from the first block, and there is
        // at least another even-positioned block, advance the position
        // in the reference list accordingly.
        if to_copy == 0 && blocks.len() > 2 {
            ref_pos = blocks[1];
            to_copy = blocks[2];
            next_block = 3;
        }
        // Number of consecutive zero deltas decoded last.
        let mut zero_run = 0;
        // Number of further zero deltas that must not be read from the
        // bitstream.
        let mut rle_zeros = 0;

        for j in 0..num_residuals {
            let mut dest;
            if j == 0 {
                last_delta = DefaultIntCoder::read(
                    first_residual_context(num_residuals as u64),
                    reader,
                    entropy,
                );
                dest = i as i64 + unpack_signed(last_delta);
            } else if rle_zeros > 0 {
                // Within a run of zeros: read nothing.
                last_delta = 0;
                dest = next_dest;
            } else {
                last_delta = DefaultIntCoder::read(residual_context(last_delta), reader, entropy);
                dest = next_dest + last_delta as i64;
            }
            // Track the run of zeros, unless already replaying one.
            if last_delta == 0 && rle_zeros == 0 {
                zero_run += 1;
            } else {
                zero_run = 0;
            }
            if rle_zeros > 0 {
                rle_zeros -= 1;
            }
            // Merge the edges copied from the reference list with the
            // ones read from the bitstream.
            while to_copy > 0 && (ref_list[ref_pos] as i64) <= dest {
                to_copy -= 1;
                let copy = ref_list[ref_pos];
                cur_list.push(copy);
                edge_cb(i as u32, copy);
                // If the delta coding would produce an edge to `dest`,
                // but some y <= dest is copied from the reference list,
                // `dest` shifts up: deltas skip copied neighbours.
                if j != 0 && copy as i64 >= next_dest {
                    dest += 1;
                }
                ref_pos += 1;
                if to_copy == 0 && next_block + 1 < blocks.len() {
                    ref_pos += blocks[next_block];
                    to_copy = blocks[next_block + 1];
                    next_block += 2;
                }
            }
            // A long enough run of zeros is followed by the number of
            // further zeros to replay.
            if zero_run >= rle_min {
                rle_zeros = DefaultIntCoder::read(RLE_CONTEXT, reader, entropy) as usize;
                zero_run = 0;
            }
            ensure!(dest >= 0 && dest < n as i64, "invalid residual");
            cur_list.push(dest as u32);
            edge_cb(i as u32, dest as u32);
            next_dest = dest + 1;
        }
        debug_assert!(ref_pos + to_copy <= ref_list.len());
        // Drain the rest of the block-copy list.
        while to_copy > 0 {
            to_copy -= 1;
            let copy = ref_list[ref_pos];
            cur_list.push(copy);
            edge_cb(i as u32, copy);
            ref_pos += 1;
            if to_copy == 0 && next_block + 1 < blocks.len() {
                ref_pos += blocks[next_block];
                to_copy = blocks[next_block + 1];
                next_block += 2;
            }
        }
    }
    ensure!(entropy.check_final_state(), "invalid stream");
    Ok(())
}

/// Decode a compressed graph, calling `edge_cb(node, successor)` for
/// every edge in vertex order, and return the number of nodes.
pub fn decode_graph(compressed: &[u8], edge_cb: impl FnMut(u32, u32)) -> Result<usize> {
    decode_graph_indices(compressed, None, edge_cb)
}

/// As [`decode_graph`], additionally recording the bit offset of each
/// vertex's first token.
pub(crate) fn decode_graph_indices(
    compressed: &[u8],
    node_starts: Option<&mut Vec<usize>>,
    edge_cb: impl FnMut(u32, u32),
) -> Result<usize> {
    ensure!(!compressed.is_empty(), "empty stream");
    let mut reader = BitReader::new(compressed);
    let n = reader.read(48) as usize;
    let allow_random_access = reader.read(1) != 0;
    if allow_random_access {
        let mut entropy = HuffmanReader::init(NUM_CONTEXTS, &mut reader)
            .context("invalid entropy header")?;
        decode_graph_impl(n, true, &mut entropy, &mut reader, node_starts, edge_cb)?;
    } else {
        let mut entropy =
            AnsReader::init(NUM_CONTEXTS, &mut reader).context("invalid entropy header")?;
        decode_graph_impl(n, false, &mut entropy, &mut reader, node_starts, edge_cb)?;
    }
    Ok(n)
}

/// Decode a compressed graph into an in-memory [`VecGraph`], logging
/// edge count and checksum.
pub fn decode_graph_to_vec(compressed: &[u8]) -> Result<VecGraph> {
    let mut lists: Vec<Vec<u32>> = Vec::new();
    let mut edges = 0u64;
    let mut chksum = 0u64;
    let n = decode_graph(compressed, |node, succ| {
        let node = node as usize;
        if lists.len() <= node {
            lists.resize(node + 1, Vec::new());
        }
        lists[node].push(succ);
        edges += 1;
        chksum = checksum(chksum, node as u64, succ as u64);
    })?;
    lists.resize(n, Vec::new());
    info!("decompressed {} nodes, {} edges, checksum {:x}", n, edges, chksum);
    Ok(VecGraph::new(lists))
}
