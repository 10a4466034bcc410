/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Canonical Huffman entropy backend.
//!
//! Code lengths are assigned with the package-merge (coin collector)
//! algorithm, capped at [`MAX_HUFFMAN_BITS`]; bit patterns follow the
//! [canonical Huffman](https://en.wikipedia.org/wiki/Canonical_Huffman_code)
//! construction, bit-reversed so that codes can be decoded with a
//! single LSB-first 8-bit table lookup. The per-context header spends
//! one presence bit per symbol plus three bits of length.
//!
//! This backend supports decoding from any bit position, which is what
//! random-access streams need.

use anyhow::{bail, ensure, Result};
use epserde::Epserde;
use mem_dbg::{MemDbg, MemSize};

use crate::codes::context::MAX_NUM_CONTEXTS;
use crate::codes::tokens::{TokenStream, NUM_SYMBOLS};
use crate::codes::EntropyRead;
use crate::impls::{BitReader, BitWriter};

/// Maximum length of a Huffman code, in bits.
pub const MAX_HUFFMAN_BITS: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct SymbolInfo {
    present: bool,
    n_bits: u8,
    bits: u8,
}

/// Entry of the 256-entry decoding table: the symbol whose code matches
/// the next 8 bits, and its length.
#[derive(Debug, Clone, Copy, Default, Epserde, MemDbg, MemSize)]
pub struct DecoderEntry {
    pub n_bits: u8,
    pub symbol: u8,
}

/// Reverse the bit order of a byte.
#[inline(always)]
fn flip_byte(x: u8) -> u8 {
    x.reverse_bits()
}

/// Very simple encoding: for each symbol, 1 bit for presence/absence,
/// and 3 bits for the symbol length if present.
fn encode_symbol_n_bits(info: &[SymbolInfo; NUM_SYMBOLS], writer: &mut BitWriter) {
    for sym in info.iter() {
        if sym.present {
            writer.write(1, 1);
            writer.write(3, sym.n_bits as u64 - 1);
        } else {
            writer.write(1, 0);
        }
    }
}

fn decode_symbol_n_bits(reader: &mut BitReader) -> [SymbolInfo; NUM_SYMBOLS] {
    let mut info = [SymbolInfo::default(); NUM_SYMBOLS];
    for sym in info.iter_mut() {
        sym.present = reader.read(1) != 0;
        if sym.present {
            sym.n_bits = reader.read(3) as u8 + 1;
        }
    }
    info
}

/// Compute the optimal number of bits for each symbol given the input
/// distribution, using a (quadratic version of) the
/// package-merge/coin-collector algorithm.
fn compute_symbol_num_bits(histogram: &[usize], info: &mut [SymbolInfo; NUM_SYMBOLS]) {
    // Mark the present/missing symbols.
    let mut nzsym = 0;
    for (i, &count) in histogram.iter().enumerate() {
        if count == 0 {
            continue;
        }
        info[i].present = true;
        nzsym += 1;
    }
    if nzsym <= 1 {
        for sym in info.iter_mut() {
            if sym.present {
                sym.n_bits = 1;
            }
        }
        return;
    }

    // A list of (cost, symbols) packages for every bit level.
    let mut bags: Vec<Vec<(usize, Vec<u8>)>> = vec![Vec::new(); MAX_HUFFMAN_BITS];
    for bag in bags.iter_mut() {
        for (s, sym) in info.iter().enumerate() {
            if sym.present {
                bag.push((histogram[s], vec![s as u8]));
            }
        }
    }

    // Pair up packages of a given bit level to create packages of the
    // following level, merging consecutively in increasing order of
    // cost.
    for i in 0..MAX_HUFFMAN_BITS - 1 {
        let (cur, rest) = bags[i..].split_first_mut().unwrap();
        cur.sort();
        let mut j = 0;
        while j + 1 < cur.len() {
            let (cost_a, mut syms) = core::mem::take(&mut cur[j]);
            let (cost_b, other) = core::mem::take(&mut cur[j + 1]);
            syms.extend(other);
            rest[0].push((cost_a + cost_b, syms));
            j += 2;
        }
    }
    bags[MAX_HUFFMAN_BITS - 1].sort();

    // Select the cheapest 2 * nzsym - 2 packages of the last level, and
    // charge one bit to each symbol occurrence in them.
    for bag in bags[MAX_HUFFMAN_BITS - 1].iter().take(2 * nzsym - 2) {
        for &sym in bag.1.iter() {
            info[sym as usize].n_bits += 1;
        }
    }

    // In a properly-constructed set of lengths, the sum over the
    // symbols of 2^-length equals 1.
    let mut kraft = 0;
    for sym in info.iter() {
        if sym.present {
            kraft += 1 << (MAX_HUFFMAN_BITS - sym.n_bits as usize);
        }
    }
    assert_eq!(kraft, 1 << MAX_HUFFMAN_BITS);
}

/// Fill the `bits` fields of an array of [`SymbolInfo`] whose `present`
/// and `n_bits` fields are set, building a canonical Huffman code.
fn compute_symbol_bits(info: &mut [SymbolInfo; NUM_SYMBOLS]) {
    let mut syms = Vec::with_capacity(NUM_SYMBOLS);
    for (i, sym) in info.iter().enumerate() {
        if sym.present {
            syms.push((sym.n_bits, i as u8));
        }
    }
    syms.sort_unstable();
    let mut x: usize = 0;
    for s in 0..syms.len() {
        info[syms[s].1 as usize].bits = flip_byte(x as u8) >> (MAX_HUFFMAN_BITS - syms[s].0 as usize);
        x += 1;
        if s + 1 != syms.len() {
            x <<= (syms[s + 1].0 - syms[s].0) as usize;
        }
    }
}

/// Compute the lookup table from the next 8 bitstream bits to the
/// decoded symbol.
fn compute_decoder_table(
    info: &[SymbolInfo; NUM_SYMBOLS],
) -> Result<[DecoderEntry; 1 << MAX_HUFFMAN_BITS]> {
    let mut table = [DecoderEntry::default(); 1 << MAX_HUFFMAN_BITS];
    let mut cnt = 0;
    let mut last = 0;
    for (sym, s) in info.iter().enumerate() {
        if s.present {
            cnt += 1;
            last = sym;
        }
    }
    if cnt <= 1 {
        for entry in table.iter_mut() {
            entry.n_bits = info[last].n_bits;
            entry.symbol = last as u8;
        }
        return Ok(table);
    }
    for (i, entry) in table.iter_mut().enumerate() {
        let mut found = None;
        for (sym, s) in info.iter().enumerate() {
            if !s.present {
                continue;
            }
            if i as u8 & (((1u16 << s.n_bits) - 1) as u8) == s.bits {
                found = Some(sym);
                break;
            }
        }
        match found {
            Some(sym) => {
                entry.n_bits = info[sym].n_bits;
                entry.symbol = sym as u8;
            }
            None => bail!("invalid Huffman table"),
        }
    }
    Ok(table)
}

/// Encode the buffered tokens into the writer: one code-length table
/// per context, then the Huffman bits and raw extra bits of each token.
pub fn huffman_encode(tokens: &TokenStream, num_contexts: usize, writer: &mut BitWriter) {
    let histograms = tokens.histograms(num_contexts);
    writer.reserve(num_contexts * NUM_SYMBOLS * 4);

    let mut info = vec![[SymbolInfo::default(); NUM_SYMBOLS]; num_contexts];
    for (i, histogram) in histograms.iter().enumerate() {
        compute_symbol_num_bits(histogram, &mut info[i]);
        compute_symbol_bits(&mut info[i]);
        encode_symbol_n_bits(&info[i], writer);
    }

    let mut total_n_bits = 0;
    tokens.for_each(|ctx, token, n_extra_bits, _, _| {
        total_n_bits += info[ctx][token].n_bits as usize + n_extra_bits;
    });
    writer.reserve(total_n_bits);

    tokens.for_each(|ctx, token, n_extra_bits, extra_bits, _| {
        writer.write(info[ctx][token].n_bits as usize, info[ctx][token].bits as u64);
        writer.write(n_extra_bits, extra_bits);
    });
}

/// Reads Huffman-coded symbols, with one 256-entry decoding table per
/// context.
#[derive(Debug, Clone, MemDbg, MemSize)]
pub struct HuffmanReader {
    info: Vec<[DecoderEntry; 1 << MAX_HUFFMAN_BITS]>,
}

impl HuffmanReader {
    /// Decode `num_contexts` code-length tables from the reader and
    /// build the corresponding decoding tables.
    pub fn init(num_contexts: usize, reader: &mut BitReader) -> Result<Self> {
        ensure!(num_contexts <= MAX_NUM_CONTEXTS, "too many contexts");
        let mut info = Vec::with_capacity(num_contexts);
        for _ in 0..num_contexts {
            let mut symbol_info = decode_symbol_n_bits(reader);
            let (kraft, cnt) = symbol_info
                .iter()
                .filter(|s| s.present)
                .fold((0, 0), |(k, c), s| {
                    (k + (1 << (MAX_HUFFMAN_BITS - s.n_bits as usize)), c + 1)
                });
            ensure!(
                cnt <= 1 || kraft == 1 << MAX_HUFFMAN_BITS,
                "invalid Huffman code lengths"
            );
            compute_symbol_bits(&mut symbol_info);
            info.push(compute_decoder_table(&symbol_info)?);
        }
        Ok(Self { info })
    }

    /// Decode one symbol from the distribution of context `ctx`. The
    /// reader must have been refilled.
    #[inline(always)]
    pub fn read_symbol(&self, ctx: usize, reader: &mut BitReader) -> usize {
        let bits = reader.peek(MAX_HUFFMAN_BITS) as usize;
        let entry = self.info[ctx][bits];
        reader.advance(entry.n_bits as usize);
        entry.symbol as usize
    }
}

impl EntropyRead for HuffmanReader {
    #[inline(always)]
    fn read(&mut self, ctx: usize, reader: &mut BitReader) -> usize {
        self.read_symbol(ctx, reader)
    }

    fn check_final_state(&self) -> bool {
        true
    }
}

impl EntropyRead for &HuffmanReader {
    #[inline(always)]
    fn read(&mut self, ctx: usize, reader: &mut BitReader) -> usize {
        self.read_symbol(ctx, reader)
    }

    fn check_final_state(&self) -> bool {
        true
    }
}
