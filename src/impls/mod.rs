/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

/*!

Implementations of bit streams.

The [`BitWriter`] packs bits LSB-first into a growable byte buffer, and
the [`BitReader`] reads them back through a 64-bit buffer refilled with
unaligned loads. Both sides are limited to
[`MAX_BITS_PER_CALL`](BitWriter::MAX_BITS_PER_CALL) bits per operation,
which keeps the hot paths branch-light; reads past the end of the stream
return zero bits, and corruption is detected by the layers above through
their own invariants.

*/

pub mod bit_reader;
pub use bit_reader::BitReader;

pub mod bit_writer;
pub use bit_writer::BitWriter;
