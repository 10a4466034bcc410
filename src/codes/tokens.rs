/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Tokenization of non-negative integers.
//!
//! An [`IntCoder`] splits a value into an entropy-coded token and raw
//! extra bits: values below `2^EXPLICIT` are their own token, and larger
//! values store their bit length, their top `MSB` mantissa bits, and
//! their low `LSB` bits in the token, leaving the middle bits raw. The
//! split parameters are const so the compiler folds them; they must be
//! identical on the encoding and decoding side, and are not recorded in
//! the bitstream.

use crate::codes::EntropyRead;
use crate::impls::BitReader;

/// Size of the token alphabet of every entropy-coded distribution.
pub const NUM_SYMBOLS: usize = 256;

/// Fold a signed value into a non-negative one, interleaving positive
/// and negative values.
#[inline(always)]
pub fn pack_signed(s: i64) -> u64 {
    ((s << 1) ^ (s >> 63)) as u64
}

/// Inverse of [`pack_signed`].
#[inline(always)]
pub fn unpack_signed(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Variable integer coder putting bits either in an entropy-coded
/// token or in raw extra bits, depending on the const configuration.
///
/// `EXPLICIT` is the base-2 logarithm of the number of values encoded
/// by their own token; `MSB` and `LSB` are the number of mantissa
/// most-significant and value least-significant bits stored in the
/// token of larger values. `EXPLICIT >= MSB + LSB` must hold.
pub struct IntCoder<const EXPLICIT: usize, const MSB: usize, const LSB: usize>;

/// The coder configuration used by the graph codec. Fixed at build
/// time, as the bitstream does not describe it.
pub type DefaultIntCoder = IntCoder<4, 1, 0>;

impl<const EXPLICIT: usize, const MSB: usize, const LSB: usize> IntCoder<EXPLICIT, MSB, LSB> {
    const NUM_EXPLICIT: u64 = 1 << EXPLICIT;

    /// Split `value` into `(token, n_extra_bits, extra_bits)`.
    #[inline(always)]
    pub fn encode(value: u64) -> (usize, usize, u64) {
        debug_assert!(EXPLICIT >= MSB + LSB);
        if value < Self::NUM_EXPLICIT {
            return (value as usize, 0, 0);
        }
        let n = value.ilog2() as usize;
        let mantissa = value - (1 << n);
        let token = Self::NUM_EXPLICIT as usize
            + (((n - EXPLICIT) << (MSB + LSB))
                | (((mantissa >> (n - MSB)) as usize) << LSB)
                | (mantissa as usize & ((1 << LSB) - 1)));
        let n_bits = n - MSB - LSB;
        (token, n_bits, (value >> LSB) & ((1u64 << n_bits) - 1))
    }

    /// Token of the split of `value`.
    #[inline(always)]
    pub fn token(value: u64) -> usize {
        Self::encode(value).0
    }

    /// Read back one value: an entropy-coded token in context `ctx`
    /// followed by its raw extra bits.
    #[inline(always)]
    pub fn read<E: EntropyRead>(ctx: usize, reader: &mut BitReader, entropy: &mut E) -> u64 {
        reader.refill();
        let token = entropy.read(ctx, reader);
        if (token as u64) < Self::NUM_EXPLICIT {
            return token as u64;
        }
        let token = token - Self::NUM_EXPLICIT as usize;
        // A corrupt stream can claim more extra bits than a single read
        // supports; the capped value is rejected by structural checks
        // downstream.
        let n_bits =
            (EXPLICIT - MSB - LSB + (token >> (MSB + LSB))).min(BitReader::MAX_BITS_PER_CALL);
        let bits = reader.read(n_bits);
        let high = (1u64 << MSB) | ((token >> LSB) as u64 & ((1 << MSB) - 1));
        (high << (n_bits + LSB)) | (bits << LSB) | (token as u64 & ((1 << LSB) - 1))
    }

    /// Cost in bits of encoding `value` in context `ctx`, where
    /// `sym_cost[ctx * NUM_SYMBOLS + token]` is the cost of each token.
    #[inline(always)]
    pub fn cost(ctx: usize, value: u64, sym_cost: &[f32]) -> f32 {
        let (token, n_bits, _) = Self::encode(value);
        sym_cost[ctx * NUM_SYMBOLS + token] + n_bits as f32
    }
}

/// A growable buffer of `(context, value)` pairs accumulated by the
/// encoder before the entropy backend serializes them.
///
/// [`remove_last`](TokenStream::remove_last) supports the run-length
/// encoder, which backs out already-buffered zero deltas when it
/// replaces them with a single run-length token.
#[derive(Debug, Default)]
pub struct TokenStream {
    ctxs: Vec<u8>,
    values: Vec<u32>,
}

impl TokenStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline(always)]
    pub fn add(&mut self, ctx: usize, value: u64) {
        debug_assert!(ctx < NUM_SYMBOLS);
        debug_assert!(value <= u32::MAX as u64);
        self.ctxs.push(ctx as u8);
        self.values.push(value as u32);
    }

    #[inline(always)]
    pub fn remove_last(&mut self) {
        self.ctxs.pop();
        self.values.pop();
    }

    #[inline(always)]
    pub fn context(&self, i: usize) -> usize {
        self.ctxs[i] as usize
    }

    #[inline(always)]
    pub fn value(&self, i: usize) -> u64 {
        self.values[i] as u64
    }

    /// Call `cb(ctx, token, n_extra_bits, extra_bits, index)` for every
    /// buffered value, in insertion order.
    pub fn for_each(&self, mut cb: impl FnMut(usize, usize, usize, u64, usize)) {
        for i in 0..self.values.len() {
            let (token, n_bits, bits) = DefaultIntCoder::encode(self.values[i] as u64);
            cb(self.ctxs[i] as usize, token, n_bits, bits, i);
        }
    }

    /// As [`for_each`](TokenStream::for_each), in reverse order.
    pub fn for_each_reversed(&self, mut cb: impl FnMut(usize, usize, usize, u64, usize)) {
        for i in (0..self.values.len()).rev() {
            let (token, n_bits, bits) = DefaultIntCoder::encode(self.values[i] as u64);
            cb(self.ctxs[i] as usize, token, n_bits, bits, i);
        }
    }

    /// Per-context token histograms.
    pub fn histograms(&self, num_contexts: usize) -> Vec<Vec<usize>> {
        let mut histograms = vec![vec![0; NUM_SYMBOLS]; num_contexts];
        self.for_each(|ctx, token, _, _, _| histograms[ctx][token] += 1);
        histograms
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::impls::BitWriter;

    struct ByteCoder;

    impl EntropyRead for ByteCoder {
        fn read(&mut self, _ctx: usize, reader: &mut BitReader) -> usize {
            reader.read(8) as usize
        }

        fn check_final_state(&self) -> bool {
            true
        }
    }

    fn test_int_coder<const E: usize, const M: usize, const L: usize>() {
        for i in 0..1 << 14 {
            let mut writer = BitWriter::new();
            writer.reserve(256);
            let (token, n_bits, bits) = IntCoder::<E, M, L>::encode(i);
            writer.write(8, token as u64);
            writer.write(n_bits, bits);
            let data = writer.into_bytes();
            let mut reader = BitReader::new(&data);
            assert_eq!(i, IntCoder::<E, M, L>::read(0, &mut reader, &mut ByteCoder));
        }
    }

    #[test]
    fn test_default() {
        test_int_coder::<4, 1, 0>();
    }

    #[test]
    fn test_000() {
        test_int_coder::<0, 0, 0>();
    }

    #[test]
    fn test_400() {
        test_int_coder::<4, 0, 0>();
    }

    #[test]
    fn test_420() {
        test_int_coder::<4, 2, 0>();
    }

    #[test]
    fn test_430() {
        test_int_coder::<4, 3, 0>();
    }

    #[test]
    fn test_440() {
        test_int_coder::<4, 4, 0>();
    }

    #[test]
    fn test_411() {
        test_int_coder::<4, 1, 1>();
    }

    #[test]
    fn test_split_of_0x1fff() {
        let (token, n_bits, bits) = IntCoder::<4, 1, 0>::encode(0x1fff);
        assert_eq!(token, 33);
        assert_eq!(n_bits, 11);
        assert_eq!(bits, 0x7ff);
    }

    #[test]
    fn test_pack_signed() {
        assert_eq!(pack_signed(0), 0);
        assert_eq!(pack_signed(-1), 1);
        assert_eq!(pack_signed(1), 2);
        assert_eq!(pack_signed(-2), 3);
        for s in -1000..1000 {
            assert_eq!(unpack_signed(pack_signed(s)), s);
        }
    }

    #[test]
    fn test_undo() {
        let mut tokens = TokenStream::new();
        tokens.add(3, 7);
        tokens.add(4, 0);
        tokens.add(4, 0);
        tokens.remove_last();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens.context(1), 4);
        assert_eq!(tokens.value(0), 7);
    }
}
