/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::prelude::*;
use arbitrary::Arbitrary;

#[derive(Arbitrary, Debug)]
pub struct FuzzCase {
    huffman: bool,
    tokens: Vec<(u8, u32)>,
}

/// Round-trip arbitrary tokens through both entropy backends.
pub fn harness(data: FuzzCase) {
    const FUZZ_CONTEXTS: usize = 16;
    let mut tokens = TokenStream::new();
    for &(ctx, value) in data.tokens.iter() {
        tokens.add(ctx as usize % FUZZ_CONTEXTS, value as u64);
    }

    let mut writer = BitWriter::new();
    if data.huffman {
        huffman_encode(&tokens, FUZZ_CONTEXTS, &mut writer);
    } else {
        ans_encode(&tokens, FUZZ_CONTEXTS, &mut writer);
    }
    let encoded = writer.into_bytes();

    let mut reader = BitReader::new(&encoded);
    if data.huffman {
        let mut entropy = HuffmanReader::init(FUZZ_CONTEXTS, &mut reader).unwrap();
        for i in 0..tokens.len() {
            assert_eq!(
                DefaultIntCoder::read(tokens.context(i), &mut reader, &mut entropy),
                tokens.value(i)
            );
        }
    } else {
        let mut entropy = AnsReader::init(FUZZ_CONTEXTS, &mut reader).unwrap();
        for i in 0..tokens.len() {
            assert_eq!(
                DefaultIntCoder::read(tokens.context(i), &mut reader, &mut entropy),
                tokens.value(i)
            );
        }
        assert!(entropy.check_final_state());
    }
}
