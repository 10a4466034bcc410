/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::prelude::*;
use arbitrary::Arbitrary;

#[derive(Arbitrary, Debug)]
pub struct FuzzCase {
    allow_random_access: bool,
    lists: Vec<Vec<u16>>,
}

/// Round-trip an arbitrary graph through the codec.
pub fn harness(data: FuzzCase) {
    let n = data.lists.len().min(512);
    let lists: Vec<Vec<u32>> = data.lists[..n]
        .iter()
        .map(|list| {
            let mut list: Vec<u32> = list
                .iter()
                .map(|&succ| succ as u32 % n.max(1) as u32)
                .collect();
            list.sort_unstable();
            list.dedup();
            list
        })
        .collect();
    let graph = VecGraph::new(lists);

    let compressed = encode_graph(&graph, data.allow_random_access);
    let decoded = decode_graph_to_vec(&compressed).unwrap();
    assert_eq!(graph, decoded);

    if data.allow_random_access {
        let random_access = CompressedGraph::new(compressed).unwrap();
        for i in 0..n {
            assert_eq!(random_access.degree(i), graph.degree(i));
            assert_eq!(random_access.neighbours(i), graph.neighbours(i));
        }
    }
}
