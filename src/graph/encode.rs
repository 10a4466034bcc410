/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The graph encoder.
//!
//! For every vertex, the encoder merges the adjacency list with each of
//! the previous [`SEARCH_WINDOW`] lists, splitting it into alternating
//! *copy* and *skip* blocks over the candidate plus delta-coded
//! *residuals*, and keeps the candidate whose token stream is cheapest
//! under the current per-context symbol costs. In random-access mode,
//! a dynamic program over the forest induced by the selected references
//! then bounds every reference chain to [`MAX_CHAIN_LENGTH`], and a
//! greedy pass restores references the program dropped where the bound
//! still holds.
//!
//! Tokens are buffered and serialized at the end, Huffman coded for
//! random-access streams and ANS coded otherwise.

use tracing::info;

use crate::codes::ans::ans_encode;
use crate::codes::context::*;
use crate::codes::huffman::huffman_encode;
use crate::codes::tokens::{pack_signed, DefaultIntCoder, TokenStream, NUM_SYMBOLS};
use crate::graph::AdjacencySource;
use crate::impls::BitWriter;
use crate::utils::checksum;

/// Rounds of cost-model refinement. More rounds improve compression a
/// bit, but are also much slower.
const NUM_ROUNDS: usize = 1;

/// Sink for the `(context, value)` pairs produced while walking a
/// vertex's blocks and residuals. The same walk estimates candidate
/// costs and emits the final token stream, so the sink is the seam;
/// `undo_last` backs out zero deltas superseded by a run-length token.
trait TokenSink {
    fn token(&mut self, ctx: usize, value: u64);
    fn undo_last(&mut self);
}

impl TokenSink for TokenStream {
    #[inline(always)]
    fn token(&mut self, ctx: usize, value: u64) {
        self.add(ctx, value);
    }

    #[inline(always)]
    fn undo_last(&mut self) {
        self.remove_last();
    }
}

/// Accumulates the cost in fractional bits of a candidate token stream,
/// and counts the symbols it would emit.
struct CostSink<'a> {
    cost: f32,
    symbol_cost: &'a [f32],
    symbol_count: &'a mut [u32],
}

impl TokenSink for CostSink<'_> {
    #[inline(always)]
    fn token(&mut self, ctx: usize, value: u64) {
        let token = DefaultIntCoder::token(value);
        self.cost += DefaultIntCoder::cost(ctx, value, self.symbol_cost);
        self.symbol_count[ctx * NUM_SYMBOLS + token] += 1;
    }

    #[inline(always)]
    fn undo_last(&mut self) {
        // Very rough estimate: assume the undone token was a zero
        // residual delta.
        self.cost -= self.symbol_cost[RESIDUAL_BASE_CONTEXT * NUM_SYMBOLS];
    }
}

/// Merge `list` with the reference list, producing the alternating
/// copy/skip block lengths and the sorted residuals.
///
/// The first block is the length of the initial run of shared
/// neighbours (possibly zero); subsequent entries alternate skip, copy,
/// skip, … over the reference list. A trailing block is dropped when it
/// is implied by the end of the reference list or would be a skip.
fn compute_blocks_and_residuals(
    list: &[u32],
    ref_list: &[u32],
    blocks: &mut Vec<u32>,
    residuals: &mut Vec<u32>,
) {
    blocks.clear();
    residuals.clear();
    let mut ipos = 0;
    let mut rpos = 0;
    let mut is_same = true;
    blocks.push(0);
    while ipos < list.len() && rpos < ref_list.len() {
        let a = list[ipos];
        let b = ref_list[rpos];
        if a == b {
            ipos += 1;
            rpos += 1;
            if !is_same {
                blocks.push(0);
            }
            is_same = true;
            let last = blocks.len() - 1;
            blocks[last] += 1;
        } else if a < b {
            ipos += 1;
            residuals.push(a);
        } else {
            if is_same {
                blocks.push(0);
            }
            is_same = false;
            let last = blocks.len() - 1;
            blocks[last] += 1;
            rpos += 1;
        }
    }
    residuals.extend_from_slice(&list[ipos..]);
    residuals.sort_unstable();
    if rpos == ref_list.len() || !is_same {
        blocks.pop();
    }
}

/// Emit the block count and lengths, collecting the neighbours the
/// copy blocks reproduce into `copied`. The trailing block is implicit;
/// lengths after the first are emitted decremented.
fn process_blocks(
    blocks: &[u32],
    ref_list: &[u32],
    copied: &mut Vec<u32>,
    sink: &mut impl TokenSink,
) {
    sink.token(BLOCK_COUNT_CONTEXT, blocks.len() as u64);
    let mut copy = true;
    let mut pos = 0;
    for (j, &block) in blocks.iter().enumerate() {
        let ctx = if j == 0 {
            BLOCK_CONTEXT
        } else if j % 2 == 0 {
            BLOCK_CONTEXT_EVEN
        } else {
            BLOCK_CONTEXT_ODD
        };
        let emitted = if j == 0 { block } else { block - 1 };
        sink.token(ctx, emitted as u64);
        if copy {
            copied.extend_from_slice(&ref_list[pos..pos + block as usize]);
        }
        pos += block as usize;
        copy = !copy;
    }
    if copy {
        copied.extend_from_slice(&ref_list[pos..]);
    }
}

/// Emit the residuals of vertex `i` as deltas.
///
/// The first residual is a signed delta against `i`; later residuals
/// are deltas against the previous residual plus one, decremented once
/// for every copied neighbour falling inside the gap, which keeps the
/// encoder symmetric with the decoder's copy/residual merge. In
/// random-access mode, runs of at least [`RLE_MIN`] zero deltas are
/// shortened to a run-length token.
fn process_residuals(
    residuals: &[u32],
    i: usize,
    copied: &[u32],
    allow_random_access: bool,
    sink: &mut impl TokenSink,
) {
    let mut next_dest = i as u64;
    let mut last_delta = 0;
    let mut adj_pos = 0;
    let mut zero_run = 0;
    for (j, &residual) in residuals.iter().enumerate() {
        let ctx;
        if j == 0 {
            ctx = first_residual_context(residuals.len() as u64);
            last_delta = pack_signed(residual as i64 - i as i64);
        } else {
            ctx = residual_context(last_delta);
            last_delta = residual as u64 - next_dest;
            while adj_pos < copied.len() && (copied[adj_pos] as u64) < next_dest {
                adj_pos += 1;
            }
            while adj_pos < copied.len() && copied[adj_pos] < residual {
                debug_assert!(last_delta > 0);
                last_delta -= 1;
                adj_pos += 1;
            }
        }
        if last_delta != 0 {
            if zero_run >= RLE_MIN && allow_random_access {
                for _ in RLE_MIN..zero_run {
                    sink.undo_last();
                }
                sink.token(RLE_CONTEXT, (zero_run - RLE_MIN) as u64);
            }
            zero_run = 0;
        }
        if last_delta == 0 {
            zero_run += 1;
        }
        sink.token(ctx, last_delta);
        next_dest = residual as u64 + 1;
    }
    if zero_run >= RLE_MIN && allow_random_access {
        for _ in RLE_MIN..zero_run {
            sink.undo_last();
        }
        sink.token(RLE_CONTEXT, (zero_run - RLE_MIN) as u64);
    }
}

/// Bound every reference chain to `max_length` links, dropping the
/// selected references whose total saved cost is smallest.
///
/// The inverse reference relation is a forest with edges from
/// `i - references[i]` to `i`. `dyn[i][k]` is the maximum total saved
/// cost attainable in the subtree rooted at `i` when at most `k` chain
/// links may still be spent above `i`: either `i` drops its parent link
/// and its children restart with a full budget, or it keeps it and the
/// children continue with `k - 1`.
fn update_references_for_max_length(
    saved_costs: &[f32],
    references: &mut [usize],
    max_length: usize,
) {
    let n = references.len();
    let mut out_edges: Vec<Vec<u32>> = vec![Vec::new(); n];
    for i in 0..n {
        debug_assert!(references[i] <= i);
        if references[i] != 0 {
            out_edges[i - references[i]].push(i as u32);
        }
    }
    let width = max_length + 1;
    let mut dyn_cost = vec![0f32; n * width];
    // true -> keep the reference of node i.
    let mut choice = vec![false; n * width];

    for i in (0..n).rev() {
        let mut child_sum_full_chain = 0f32;
        for &child in out_edges[i].iter() {
            child_sum_full_chain += dyn_cost[child as usize * width + max_length];
        }
        choice[i * width] = false;
        dyn_cost[i * width] = child_sum_full_chain;

        for links_to_use in 1..=max_length {
            let mut child_sum = saved_costs[i];
            for &child in out_edges[i].iter() {
                child_sum += dyn_cost[child as usize * width + links_to_use - 1];
            }
            if child_sum > child_sum_full_chain {
                choice[i * width + links_to_use] = true;
                dyn_cost[i * width + links_to_use] = child_sum;
            } else {
                choice[i * width + links_to_use] = false;
                dyn_cost[i * width + links_to_use] = child_sum_full_chain;
            }
        }
    }

    let mut available_length = vec![max_length; n];
    for i in 0..n {
        if choice[i * width + available_length[i]] {
            // Taken: the children inherit the shortened budget.
            for &child in out_edges[i].iter() {
                available_length[child as usize] = available_length[i] - 1;
            }
        } else {
            references[i] = 0;
        }
    }
}

/// Walk the blocks and residuals of `i` against candidate reference
/// `r`, feeding the sink; returns nothing, results accumulate in the
/// sink and in the scratch vectors.
fn process_candidate<G: AdjacencySource>(
    g: &G,
    i: usize,
    r: usize,
    allow_random_access: bool,
    blocks: &mut Vec<u32>,
    residuals: &mut Vec<u32>,
    copied: &mut Vec<u32>,
    sink: &mut impl TokenSink,
) {
    copied.clear();
    if r == 0 {
        residuals.clear();
        residuals.extend_from_slice(g.neighbours(i));
    } else {
        compute_blocks_and_residuals(g.neighbours(i), g.neighbours(i - r), blocks, residuals);
        process_blocks(blocks, g.neighbours(i - r), copied, sink);
    }
    process_residuals(residuals, i, copied, allow_random_access, sink);
}

/// Compress a graph, returning the compressed byte buffer.
///
/// With `allow_random_access`, the stream is Huffman coded, degrees and
/// references restart every [`DEGREE_REFERENCE_CHUNK_SIZE`] vertices,
/// zero-delta runs are run-length coded, and reference chains are
/// bounded, so that a [`CompressedGraph`](crate::graph::CompressedGraph)
/// can answer per-vertex queries; otherwise the stream is ANS coded and
/// strictly sequential.
pub fn encode_graph<G: AdjacencySource>(g: &G, allow_random_access: bool) -> Vec<u8> {
    let n = g.size();
    let mut writer = BitWriter::new();
    writer.reserve(64);
    writer.write(48, n as u64);
    writer.write(1, allow_random_access as u64);

    let mut references = vec![0usize; n];
    let mut saved_costs = vec![0f32; n];
    let mut symbol_cost = vec![1.0f32; NUM_CONTEXTS * NUM_SYMBOLS];
    let mut symbol_count = vec![0u32; NUM_CONTEXTS * NUM_SYMBOLS];
    let mut residuals: Vec<u32> = Vec::new();
    let mut blocks: Vec<u32> = Vec::new();
    let mut copied: Vec<u32> = Vec::new();

    for round in 0..NUM_ROUNDS {
        info!(round = round + 1, "selecting references");
        references.fill(0);
        for i in 0..n {
            // Baseline: no reference, the whole list is residuals.
            let mut sink = CostSink {
                cost: 0.0,
                symbol_cost: &symbol_cost,
                symbol_count: &mut symbol_count,
            };
            process_candidate(
                g,
                i,
                0,
                allow_random_access,
                &mut blocks,
                &mut residuals,
                &mut copied,
                &mut sink,
            );
            let base_cost = sink.cost;
            let mut best_cost = base_cost;
            saved_costs[i] = 0.0;

            for r in 1..=SEARCH_WINDOW.min(i) {
                let mut sink = CostSink {
                    cost: 0.0,
                    symbol_cost: &symbol_cost,
                    symbol_count: &mut symbol_count,
                };
                process_candidate(
                    g,
                    i,
                    r,
                    allow_random_access,
                    &mut blocks,
                    &mut residuals,
                    &mut copied,
                    &mut sink,
                );
                if sink.cost + 1e-6 < best_cost {
                    references[i] = r;
                    best_cost = sink.cost;
                    saved_costs[i] = base_cost - sink.cost;
                }
            }
        }

        // Ensure the maximum reference chain length.
        if allow_random_access {
            update_references_for_max_length(&saved_costs, &mut references, MAX_CHAIN_LENGTH);

            let mut chain_length = vec![0usize; n];
            for i in 0..n {
                if references[i] != 0 {
                    chain_length[i] = chain_length[i - references[i]] + 1;
                }
            }
            let mut fwd_chain_length = vec![0usize; n];
            for i in (0..n).rev() {
                if references[i] != 0 {
                    let parent = i - references[i];
                    fwd_chain_length[parent] =
                        fwd_chain_length[parent].max(fwd_chain_length[i] + 1);
                }
            }

            info!(round = round + 1, "restoring removed references");
            for i in 0..n {
                if references[i] != 0 {
                    chain_length[i] = chain_length[i - references[i]] + 1;
                    continue;
                }
                let mut sink = CostSink {
                    cost: 0.0,
                    symbol_cost: &symbol_cost,
                    symbol_count: &mut symbol_count,
                };
                process_candidate(
                    g,
                    i,
                    0,
                    allow_random_access,
                    &mut blocks,
                    &mut residuals,
                    &mut copied,
                    &mut sink,
                );
                let mut best_cost = sink.cost;

                for r in 1..=SEARCH_WINDOW.min(i) {
                    if chain_length[i - r] + fwd_chain_length[i] + 1 > MAX_CHAIN_LENGTH {
                        continue;
                    }
                    let mut sink = CostSink {
                        cost: 0.0,
                        symbol_cost: &symbol_cost,
                        symbol_count: &mut symbol_count,
                    };
                    process_candidate(
                        g,
                        i,
                        r,
                        allow_random_access,
                        &mut blocks,
                        &mut residuals,
                        &mut copied,
                        &mut sink,
                    );
                    if sink.cost + 1e-6 < best_cost {
                        references[i] = r;
                        best_cost = sink.cost;
                    }
                }
                if references[i] != 0 {
                    chain_length[i] = chain_length[i - references[i]] + 1;
                }
            }
        }

        symbol_count.fill(0);

        // Refresh the per-symbol costs from the selected references for
        // the next round.
        if round + 1 != NUM_ROUNDS {
            info!(round = round + 1, "computing frequencies");
            for i in 0..n {
                let mut sink = CostSink {
                    cost: 0.0,
                    symbol_cost: &symbol_cost,
                    symbol_count: &mut symbol_count,
                };
                process_candidate(
                    g,
                    i,
                    references[i],
                    allow_random_access,
                    &mut blocks,
                    &mut residuals,
                    &mut copied,
                    &mut sink,
                );
            }
            for ctx in 0..NUM_CONTEXTS {
                let counts = &mut symbol_count[ctx * NUM_SYMBOLS..(ctx + 1) * NUM_SYMBOLS];
                let total: u32 = counts.iter().sum();
                if total == 0 {
                    continue;
                }
                for (s, count) in counts.iter_mut().enumerate() {
                    let cnt = (*count as f32).max(0.1);
                    symbol_cost[ctx * NUM_SYMBOLS + s] = (total as f32 / cnt).ln();
                    *count = 0;
                }
            }
        }
    }

    info!("compressing");
    let mut tokens = TokenStream::new();
    let mut last_reference = 0;
    let mut last_degree_delta = 0;
    let mut prev_degree = 0u64;
    for i in 0..n {
        let degree = g.degree(i) as u64;
        if (allow_random_access && i % DEGREE_REFERENCE_CHUNK_SIZE == 0) || i == 0 {
            last_reference = 0;
            last_degree_delta = degree;
            tokens.add(FIRST_DEGREE_CONTEXT, last_degree_delta);
        } else {
            let ctx = degree_context(last_degree_delta);
            last_degree_delta = pack_signed(degree as i64 - prev_degree as i64);
            tokens.add(ctx, last_degree_delta);
        }
        prev_degree = degree;
        if degree == 0 {
            continue;
        }
        let reference = references[i];
        if reference == 0 {
            residuals.clear();
            residuals.extend_from_slice(g.neighbours(i));
        } else {
            compute_blocks_and_residuals(
                g.neighbours(i),
                g.neighbours(i - reference),
                &mut blocks,
                &mut residuals,
            );
        }
        copied.clear();
        if i != 0 {
            tokens.add(reference_context(last_reference), reference as u64);
            last_reference = reference;
            if reference != 0 {
                process_blocks(&blocks, g.neighbours(i - reference), &mut copied, &mut tokens);
            }
        }
        process_residuals(&residuals, i, &copied, allow_random_access, &mut tokens);
    }

    if allow_random_access {
        huffman_encode(&tokens, NUM_CONTEXTS, &mut writer);
    } else {
        ans_encode(&tokens, NUM_CONTEXTS, &mut writer);
    }
    let data = writer.into_bytes();

    let mut edges = 0u64;
    let mut chksum = 0u64;
    for i in 0..n {
        for &succ in g.neighbours(i) {
            edges += 1;
            chksum = checksum(chksum, i as u64, succ as u64);
        }
    }
    info!(
        "compressed {} edges to {:.2} bits per edge, checksum {:x}",
        edges,
        8.0 * data.len() as f64 / edges.max(1) as f64,
        chksum
    );
    data
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identical_lists_become_one_copy_block() {
        let list = [2u32, 3, 5, 9];
        let mut blocks = Vec::new();
        let mut residuals = Vec::new();
        compute_blocks_and_residuals(&list, &list, &mut blocks, &mut residuals);
        assert!(blocks.is_empty());
        assert!(residuals.is_empty());
    }

    #[test]
    fn test_disjoint_lists_are_all_residuals() {
        let mut blocks = Vec::new();
        let mut residuals = Vec::new();
        compute_blocks_and_residuals(&[1, 3, 5], &[0, 2, 6], &mut blocks, &mut residuals);
        // Initial empty copy run; the trailing skip run is implicit.
        assert_eq!(blocks, vec![0]);
        assert_eq!(residuals, vec![1, 3, 5]);
    }

    #[test]
    fn test_partial_overlap() {
        let mut blocks = Vec::new();
        let mut residuals = Vec::new();
        // Shares the prefix [2, 3] and the element 9.
        compute_blocks_and_residuals(&[2, 3, 7, 9], &[2, 3, 5, 9], &mut blocks, &mut residuals);
        assert_eq!(blocks, vec![2, 1]);
        assert_eq!(residuals, vec![7]);
    }

    #[derive(Default)]
    struct RecordingSink {
        tokens: Vec<(usize, u64)>,
    }

    impl TokenSink for RecordingSink {
        fn token(&mut self, ctx: usize, value: u64) {
            self.tokens.push((ctx, value));
        }

        fn undo_last(&mut self) {
            self.tokens.pop();
        }
    }

    #[test]
    fn test_zero_delta_run_becomes_rle_token() {
        // Residuals 10..=20 of vertex 2: one first residual, then ten
        // zero deltas. RLE_MIN of them stay explicit, the other seven
        // collapse into one run-length token.
        let residuals: Vec<u32> = (10..=20).collect();
        let mut sink = RecordingSink::default();
        process_residuals(&residuals, 2, &[], true, &mut sink);
        assert_eq!(sink.tokens.len(), 1 + RLE_MIN + 1);
        assert_eq!(sink.tokens[0].1, pack_signed(10 - 2));
        for j in 1..=RLE_MIN {
            assert_eq!(sink.tokens[j].1, 0);
            assert!((RESIDUAL_BASE_CONTEXT..RLE_CONTEXT).contains(&sink.tokens[j].0));
        }
        assert_eq!(*sink.tokens.last().unwrap(), (RLE_CONTEXT, 7));
    }

    #[test]
    fn test_no_rle_in_sequential_mode() {
        let residuals: Vec<u32> = (10..=20).collect();
        let mut sink = RecordingSink::default();
        process_residuals(&residuals, 2, &[], false, &mut sink);
        assert_eq!(sink.tokens.len(), residuals.len());
        assert!(sink.tokens.iter().all(|&(ctx, _)| ctx != RLE_CONTEXT));
    }

    #[test]
    fn test_copied_neighbours_shrink_deltas() {
        // Residuals 5 and 9 with copied neighbours 6 and 7 in between:
        // the delta of 9 against 6 shrinks by two.
        let mut sink = RecordingSink::default();
        process_residuals(&[5, 9], 2, &[6, 7], false, &mut sink);
        assert_eq!(sink.tokens[0].1, pack_signed(5 - 2));
        assert_eq!(sink.tokens[1].1, 1);
    }

    #[test]
    fn test_chain_length_dp_drops_cheapest_links() {
        // A chain 0 <- 1 <- 2 <- 3 <- 4 <- 5 of unit savings must lose
        // at least one link with a budget of 3; the DP drops exactly
        // one and keeps the rest.
        let saved = vec![0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let mut references = vec![0, 1, 1, 1, 1, 1];
        update_references_for_max_length(&saved, &mut references, 3);
        let kept = references.iter().filter(|&&r| r != 0).count();
        assert_eq!(kept, 4);
        let mut chain = vec![0usize; references.len()];
        for i in 0..references.len() {
            if references[i] != 0 {
                chain[i] = chain[i - references[i]] + 1;
                assert!(chain[i] <= 3);
            }
        }
    }
}
