/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Table-based asymmetric numeral systems entropy backend.
//!
//! Distributions are normalized to [`ANS_TAB_SIZE`] and decoded through
//! an [alias table](https://en.wikipedia.org/wiki/Alias_method): the
//! 12-bit slot space is divided into 256 entries of 16 slots, each
//! mapping to at most two symbols, so a lookup is a single 8-byte load
//! plus masking. The 32-bit coder state starts and ends at
//! [`ANS_SIGNATURE`], renormalizing through 16-bit stream chunks.
//!
//! The encoder walks the tokens in reverse time order, so that the
//! decoder can replay them forward; the renormalization chunks it
//! produces are then interleaved into the forward bitstream just before
//! the extra bits of the token that consumed them.

use anyhow::{ensure, Result};
use epserde::Epserde;
use mem_dbg::{MemDbg, MemSize};

use crate::codes::context::MAX_NUM_CONTEXTS;
use crate::codes::tokens::{TokenStream, NUM_SYMBOLS};
use crate::codes::EntropyRead;
use crate::impls::{BitReader, BitWriter};

/// Bits of precision of the normalized distributions.
pub const ANS_NUM_BITS: usize = 12;
/// Sum of every normalized non-empty distribution.
pub const ANS_TAB_SIZE: usize = 1 << ANS_NUM_BITS;
/// Initial and final value of the coder state.
pub const ANS_SIGNATURE: u32 = 0x13 << 16;

const LOG_ENTRY_SIZE: usize = ANS_NUM_BITS - 8;
const ENTRY_SIZE: usize = 1 << LOG_ENTRY_SIZE;

/// Precision of the reciprocal multiplication replacing the division in
/// the encoder: number of state bits plus number of frequency bits.
const RECIPROCAL_PRECISION: u32 = 32 + ANS_NUM_BITS as u32;

/// Entry of an alias table. Within the 16 slots covered by entry `i`,
/// the first `cutoff` slots map to symbol `i` and the others to
/// `right_value`, whose slots start at offset `offsets1 + cutoff`.
///
/// The layout packs into 8 bytes so that a lookup can load one 64-bit
/// word; `freq1_xor_freq0` makes the frequency selection branchless.
#[derive(Debug, Clone, Copy, Default, Epserde, MemDbg, MemSize)]
#[repr(C)]
pub struct AliasEntry {
    cutoff: u8,
    right_value: u8,
    freq0: u16,
    offsets1: u16,
    freq1_xor_freq0: u16,
}

/// Result of an alias-table lookup.
#[derive(Debug, Clone, Copy)]
pub struct AliasSymbol {
    pub value: usize,
    pub offset: usize,
    pub freq: usize,
}

/// Map a 12-bit slot to its symbol, the number of smaller slots of the
/// same symbol, and the symbol frequency.
#[inline(always)]
fn lookup(table: &[AliasEntry; NUM_SYMBOLS], slot: usize) -> AliasSymbol {
    let i = slot >> LOG_ENTRY_SIZE;
    let pos = slot & (ENTRY_SIZE - 1);
    let entry = table[i];
    let greater = pos >= entry.cutoff as usize;
    let offsets1_or_0 = if greater { entry.offsets1 } else { 0 };
    let freq1_xor_freq0_or_0 = if greater { entry.freq1_xor_freq0 } else { 0 };
    AliasSymbol {
        value: if greater { entry.right_value as usize } else { i },
        offset: offsets1_or_0 as usize + pos,
        freq: (entry.freq0 ^ freq1_xor_freq0_or_0) as usize,
    }
}

/// Scale a histogram so that it sums to exactly [`ANS_TAB_SIZE`], every
/// present symbol keeping a frequency of at least one. An all-zero
/// histogram gets its full weight on symbol zero.
fn normalize_histogram(histogram: &mut [usize]) {
    let sum: usize = histogram.iter().sum();
    if sum == 0 {
        histogram[0] = ANS_TAB_SIZE;
        return;
    }
    let mut symbols_with_freq: Vec<(usize, usize)> = histogram
        .iter()
        .enumerate()
        .filter(|&(_, &freq)| freq != 0)
        .map(|(i, &freq)| (freq, i))
        .collect();
    symbols_with_freq.sort_unstable();
    for &(freq, sym) in symbols_with_freq.iter() {
        histogram[sym] = (freq * ANS_TAB_SIZE / sum).max(1);
    }

    // Assign all the extra (or missing) weight to the highest-weight
    // symbol.
    let new_sum: usize = histogram.iter().sum();
    let top = symbols_with_freq.last().expect("non-empty histogram").1;
    histogram[top] = (histogram[top] as i64 + ANS_TAB_SIZE as i64 - new_sum as i64) as usize;
    debug_assert_eq!(histogram.iter().sum::<usize>(), ANS_TAB_SIZE);
}

/// Build the alias table of a distribution summing to
/// [`ANS_TAB_SIZE`].
///
/// Trailing zero-frequency symbols are dropped; an empty distribution
/// becomes a single dummy symbol with full weight, so that a
/// specially-crafted stream cannot crash the decoder. Entries start out
/// holding `distribution[i]` of their own slots; overfull and underfull
/// entry positions are kept on two stacks, and slots are moved from the
/// top overfull entry to the top underfull one until every entry covers
/// exactly [`ENTRY_SIZE`] slots of at most two symbols.
fn init_alias_table(mut distribution: Vec<usize>) -> [AliasEntry; NUM_SYMBOLS] {
    let mut table = [AliasEntry::default(); NUM_SYMBOLS];
    while distribution.last() == Some(&0) {
        distribution.pop();
    }
    if distribution.is_empty() {
        distribution.push(ANS_TAB_SIZE);
    }
    debug_assert!(distribution.len() <= NUM_SYMBOLS);
    debug_assert_eq!(distribution.iter().sum::<usize>(), ANS_TAB_SIZE);

    let mut underfull = Vec::new();
    let mut overfull = Vec::new();
    let mut cutoffs = [0usize; NUM_SYMBOLS];
    for (i, &freq) in distribution.iter().enumerate() {
        cutoffs[i] = freq;
        if freq > ENTRY_SIZE {
            overfull.push(i);
        } else if freq < ENTRY_SIZE {
            underfull.push(i);
        }
    }
    for (i, cutoff) in cutoffs.iter().enumerate().skip(distribution.len()) {
        debug_assert_eq!(*cutoff, 0);
        underfull.push(i);
    }

    // Move slots from overfull entries to underfull ones; the slots
    // lent by entry `o` are taken from the end of its own run.
    while let Some(o) = overfull.pop() {
        let u = underfull.pop().expect("as many underfull as overfull slots");
        let needed = ENTRY_SIZE - cutoffs[u];
        cutoffs[o] -= needed;
        table[u].right_value = o as u8;
        table[u].offsets1 = cutoffs[o] as u16;
        if cutoffs[o] < ENTRY_SIZE {
            underfull.push(o);
        } else if cutoffs[o] > ENTRY_SIZE {
            overfull.push(o);
        }
    }

    for i in 0..NUM_SYMBOLS {
        if cutoffs[i] == ENTRY_SIZE {
            table[i].right_value = i as u8;
            table[i].offsets1 = 0;
            table[i].cutoff = 0;
        } else {
            // offsets1 was set to the start of the lent run within the
            // overfull entry; store it relative to the cutoff.
            table[i].offsets1 -= cutoffs[i] as u16;
            table[i].cutoff = cutoffs[i] as u8;
        }
        let freq0 = distribution.get(i).copied().unwrap_or(0);
        let freq1 = distribution
            .get(table[i].right_value as usize)
            .copied()
            .unwrap_or(0);
        table[i].freq0 = freq0 as u16;
        table[i].freq1_xor_freq0 = (freq1 ^ freq0) as u16;
    }
    table
}

/// Very simple encoding: for each symbol, 1 bit for presence/absence,
/// and [`ANS_NUM_BITS`] bits for the symbol frequency if present.
fn encode_symbol_probabilities(histogram: &[usize], writer: &mut BitWriter) {
    for i in 0..NUM_SYMBOLS {
        let freq = histogram.get(i).copied().unwrap_or(0);
        if freq != 0 {
            writer.write(1, 1);
            writer.write(ANS_NUM_BITS, freq as u64 - 1);
        } else {
            writer.write(1, 0);
        }
    }
}

fn decode_symbol_probabilities(reader: &mut BitReader) -> Vec<usize> {
    let mut histogram = vec![0; NUM_SYMBOLS];
    for freq in histogram.iter_mut() {
        if reader.read(1) != 0 {
            *freq = reader.read(ANS_NUM_BITS) as usize + 1;
        }
    }
    histogram
}

struct EncSymbolInfo {
    freq: u32,
    /// Value such that `(state * ifreq) >> RECIPROCAL_PRECISION`
    /// equals `state / freq`.
    ifreq: u64,
    /// Slot with `lookup(slot) == (symbol, offset, freq)` for each
    /// offset.
    reverse_map: Vec<u16>,
}

/// Encode the buffered tokens into the writer: one frequency table per
/// context, the 32-bit final coder state, then the interleaved
/// renormalization chunks and raw extra bits of each token.
pub fn ans_encode(tokens: &TokenStream, num_contexts: usize, writer: &mut BitWriter) {
    let mut histograms = tokens.histograms(num_contexts);
    writer.reserve(num_contexts * NUM_SYMBOLS * (1 + ANS_NUM_BITS));

    // Normalize and encode the histograms, and compute the encoder side
    // of the alias tables.
    let mut enc_info: Vec<Vec<EncSymbolInfo>> = Vec::with_capacity(num_contexts);
    for histogram in histograms.iter_mut() {
        normalize_histogram(histogram);
        encode_symbol_probabilities(histogram, writer);
        let entries = init_alias_table(histogram.clone());
        let mut infos: Vec<EncSymbolInfo> = histogram
            .iter()
            .map(|&freq| EncSymbolInfo {
                freq: freq as u32,
                ifreq: if freq == 0 {
                    0
                } else {
                    ((1u64 << RECIPROCAL_PRECISION) + freq as u64 - 1) / freq as u64
                },
                reverse_map: vec![0; freq],
            })
            .collect();
        for slot in 0..ANS_TAB_SIZE {
            let s = lookup(&entries, slot);
            if s.freq == 0 {
                continue;
            }
            infos[s.value].reverse_map[s.offset] = slot as u16;
        }
        enc_info.push(infos);
    }

    // The decoder must consume renorm_bits[i] just before the token at
    // index renorm_idx[i].
    let mut renorm_bits: Vec<u16> = Vec::new();
    let mut renorm_idx: Vec<usize> = Vec::new();
    let mut extra_bits = 0;
    let mut state: u32 = ANS_SIGNATURE;

    // Walk the tokens in reverse time order to compute state updates.
    tokens.for_each_reversed(|ctx, token, n_bits, _, i| {
        extra_bits += n_bits;
        let info = &enc_info[ctx][token];
        // Flush the state.
        if state >> (32 - ANS_NUM_BITS) >= info.freq {
            renorm_bits.push((state & 0xffff) as u16);
            renorm_idx.push(i);
            state >>= 16;
        }
        let q = ((state as u64 * info.ifreq) >> RECIPROCAL_PRECISION) as u32;
        let offset = info.reverse_map[(state - q * info.freq) as usize];
        state = (q << ANS_NUM_BITS) + offset as u32;
    });

    writer.reserve(extra_bits + renorm_bits.len() * 16 + 32);
    writer.write(32, state as u64);

    // Walk the tokens in forward order to produce the output.
    let mut renorm_pos = renorm_idx.len();
    tokens.for_each(|_, _, n_bits, bits, i| {
        if renorm_pos > 0 && i == renorm_idx[renorm_pos - 1] {
            renorm_pos -= 1;
            writer.write(16, renorm_bits[renorm_pos] as u64);
        }
        writer.write(n_bits, bits);
    });
}

/// Reads ANS-coded symbols, with one alias table per context.
#[derive(Debug, Clone, MemDbg, MemSize)]
pub struct AnsReader {
    entries: Vec<[AliasEntry; NUM_SYMBOLS]>,
    state: u32,
}

impl AnsReader {
    /// Decode `num_contexts` frequency tables from the reader, build
    /// the corresponding alias tables, and read the initial state.
    pub fn init(num_contexts: usize, reader: &mut BitReader) -> Result<Self> {
        ensure!(num_contexts <= MAX_NUM_CONTEXTS, "too many contexts");
        let mut entries = Vec::with_capacity(num_contexts);
        for _ in 0..num_contexts {
            let histogram = decode_symbol_probabilities(reader);
            let total: usize = histogram.iter().sum();
            ensure!(
                total == 0 || total == ANS_TAB_SIZE,
                "invalid histogram: sums to {}",
                total
            );
            entries.push(init_alias_table(histogram));
        }
        let state = reader.read(32) as u32;
        Ok(Self { entries, state })
    }
}

impl EntropyRead for AnsReader {
    #[inline(always)]
    fn read(&mut self, ctx: usize, reader: &mut BitReader) -> usize {
        let slot = self.state as usize & (ANS_TAB_SIZE - 1);
        let symbol = lookup(&self.entries[ctx], slot);
        self.state = symbol.freq as u32 * (self.state >> ANS_NUM_BITS) + symbol.offset as u32;
        if self.state < 1 << 16 {
            self.state = (self.state << 16) | reader.peek(16) as u32;
            reader.advance(16);
            if self.state < 1 << 16 {
                self.state = (self.state << 16) | reader.peek(16) as u32;
                reader.advance(16);
            }
        }
        symbol.value
    }

    fn check_final_state(&self) -> bool {
        self.state == ANS_SIGNATURE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codes::tokens::DefaultIntCoder;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn slot_counts(table: &[AliasEntry; NUM_SYMBOLS]) -> Vec<usize> {
        let mut counts = vec![0; NUM_SYMBOLS];
        for slot in 0..ANS_TAB_SIZE {
            counts[lookup(table, slot).value] += 1;
        }
        counts
    }

    #[test]
    fn test_normalization() {
        let mut rng = SmallRng::seed_from_u64(0);
        for _ in 0..100 {
            let mut histogram = vec![0usize; NUM_SYMBOLS];
            for freq in histogram.iter_mut().take(rng.gen_range(1..NUM_SYMBOLS)) {
                *freq = rng.gen_range(0..100_000);
            }
            let had_any = histogram.iter().any(|&f| f != 0);
            let orig = histogram.clone();
            normalize_histogram(&mut histogram);
            assert_eq!(histogram.iter().sum::<usize>(), ANS_TAB_SIZE);
            if had_any {
                for (sym, &freq) in orig.iter().enumerate() {
                    assert_eq!(freq != 0, histogram[sym] != 0);
                }
            }
        }
    }

    #[test]
    fn test_alias_table_maps_freq_slots_per_symbol() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            let mut histogram = vec![0usize; NUM_SYMBOLS];
            for freq in histogram.iter_mut().take(rng.gen_range(1..NUM_SYMBOLS)) {
                *freq = rng.gen_range(0..1000);
            }
            normalize_histogram(&mut histogram);
            let table = init_alias_table(histogram.clone());
            assert_eq!(slot_counts(&table), histogram);
        }
    }

    #[test]
    fn test_empty_histogram_yields_dummy_symbol() {
        let table = init_alias_table(vec![0; NUM_SYMBOLS]);
        let counts = slot_counts(&table);
        assert_eq!(counts[0], ANS_TAB_SIZE);
        // Offsets of the dummy symbol enumerate the slots.
        for slot in 0..ANS_TAB_SIZE {
            let s = lookup(&table, slot);
            assert_eq!(s.offset, slot);
            assert_eq!(s.freq, ANS_TAB_SIZE);
        }
    }

    fn roundtrip(tokens: &TokenStream, num_contexts: usize) {
        let mut writer = BitWriter::new();
        ans_encode(tokens, num_contexts, &mut writer);
        let data = writer.into_bytes();
        let mut reader = BitReader::new(&data);
        let mut entropy = AnsReader::init(num_contexts, &mut reader).unwrap();
        for i in 0..tokens.len() {
            assert_eq!(
                DefaultIntCoder::read(tokens.context(i), &mut reader, &mut entropy),
                tokens.value(i)
            );
        }
        assert!(entropy.check_final_state());
    }

    #[test]
    fn test_roundtrip() {
        const N: usize = 1 << 16;
        const NUM_CONTEXTS: usize = 128;
        let mut rng = SmallRng::seed_from_u64(2);
        let mut tokens = TokenStream::new();
        for _ in 0..N {
            tokens.add(rng.gen_range(0..NUM_CONTEXTS), rng.gen::<u32>() as u64);
        }
        roundtrip(&tokens, NUM_CONTEXTS);
    }

    #[test]
    fn test_roundtrip_unbalanced_histogram() {
        // One dominant symbol and a small tail, so that the normalized
        // distribution is strongly skewed.
        const N: usize = 100_000;
        let mut rng = SmallRng::seed_from_u64(3);
        let mut tokens = TokenStream::new();
        for _ in 0..N {
            let value = if rng.gen_range(0..4096) < 4000 {
                0
            } else {
                rng.gen_range(1..11)
            };
            tokens.add(0, value);
        }
        roundtrip(&tokens, 1);
    }

    #[test]
    fn test_roundtrip_single_symbol() {
        let mut tokens = TokenStream::new();
        for _ in 0..1000 {
            tokens.add(0, 7);
        }
        roundtrip(&tokens, 1);
    }

    #[test]
    fn test_invalid_histogram_sum_is_rejected() {
        let mut writer = BitWriter::new();
        writer.reserve(NUM_SYMBOLS * (1 + ANS_NUM_BITS) + 32);
        writer.write(1, 1);
        writer.write(ANS_NUM_BITS, 999);
        for _ in 1..NUM_SYMBOLS {
            writer.write(1, 0);
        }
        writer.write(32, ANS_SIGNATURE as u64);
        let data = writer.into_bytes();
        let mut reader = BitReader::new(&data);
        assert!(AnsReader::init(1, &mut reader).is_err());
    }
}
