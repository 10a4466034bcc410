/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use dsi_graph_codec::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A graph with random sorted adjacency lists.
fn random_graph(n: usize, max_degree: usize, rng: &mut SmallRng) -> VecGraph {
    let mut lists = Vec::with_capacity(n);
    for _ in 0..n {
        let degree = rng.gen_range(0..=max_degree);
        let mut list: Vec<u32> = (0..degree).map(|_| rng.gen_range(0..n) as u32).collect();
        list.sort_unstable();
        list.dedup();
        lists.push(list);
    }
    VecGraph::new(lists)
}

/// A graph where nearby vertices share most of their neighbours, so
/// that reference selection and block copying kick in.
fn clustered_graph(n: usize, rng: &mut SmallRng) -> VecGraph {
    let mut lists: Vec<Vec<u32>> = Vec::with_capacity(n);
    let mut base: Vec<u32> = Vec::new();
    for i in 0..n {
        if i % 16 == 0 || rng.gen_range(0..8) == 0 {
            let degree = rng.gen_range(0..32);
            base = (0..degree).map(|_| rng.gen_range(0..n) as u32).collect();
            base.sort_unstable();
            base.dedup();
        } else {
            // Mutate the shared list a little.
            for _ in 0..rng.gen_range(0..3) {
                base.push(rng.gen_range(0..n) as u32);
            }
            base.sort_unstable();
            base.dedup();
            if !base.is_empty() && rng.gen_bool(0.5) {
                let at = rng.gen_range(0..base.len());
                base.remove(at);
            }
        }
        lists.push(base.clone());
    }
    VecGraph::new(lists)
}

/// A graph whose adjacency lists are runs of consecutive ids, so that
/// residual deltas are long runs of zeros.
fn runs_graph(n: usize, rng: &mut SmallRng) -> VecGraph {
    let mut lists = Vec::with_capacity(n);
    for _ in 0..n {
        let len = rng.gen_range(0..20);
        let start = rng.gen_range(0..n.saturating_sub(len).max(1));
        lists.push((start..start + len).map(|x| x as u32).collect());
    }
    VecGraph::new(lists)
}

fn graph_checksum(g: &VecGraph) -> u64 {
    let mut chksum = 0;
    for i in 0..g.size() {
        for &succ in g.neighbours(i) {
            chksum = checksum(chksum, i as u64, succ as u64);
        }
    }
    chksum
}

fn assert_roundtrip(graph: &VecGraph, allow_random_access: bool) -> Vec<u8> {
    let compressed = encode_graph(graph, allow_random_access);
    let mut decode_chksum = 0;
    let mut lists: Vec<Vec<u32>> = vec![Vec::new(); graph.size()];
    let n = decode_graph(&compressed, |node, succ| {
        lists[node as usize].push(succ);
        decode_chksum = checksum(decode_chksum, node as u64, succ as u64);
    })
    .unwrap();
    assert_eq!(n, graph.size());
    assert_eq!(&VecGraph::new(lists), graph);
    assert_eq!(decode_chksum, graph_checksum(graph));
    compressed
}

#[test]
fn test_three_vertices_sequential() {
    let graph = VecGraph::new(vec![vec![0, 1], vec![1, 2], vec![0]]);
    let compressed = encode_graph(&graph, false);
    let decoded = decode_graph_to_vec(&compressed).unwrap();
    assert_eq!(decoded, graph);
    assert_eq!(decoded.size(), 3);
    assert_eq!(decoded.degree(0), 2);
    assert_eq!(decoded.degree(1), 2);
    assert_eq!(decoded.degree(2), 1);
}

#[test]
fn test_identical_adjacent_lists_copy_reference() {
    // Vertex 3 repeats the list of vertex 2: the reference encoding
    // must reproduce it exactly, and spend less than an explicit list.
    let shared: Vec<u32> = vec![1, 4, 9, 16, 25, 36, 49];
    let graph = VecGraph::new(vec![
        vec![2, 3],
        vec![0, 5],
        shared.clone(),
        shared.clone(),
        vec![7],
    ]);
    for allow_random_access in [false, true] {
        assert_roundtrip(&graph, allow_random_access);
    }
}

#[test]
fn test_zero_delta_run_random_access() {
    // Vertex 2's list is eleven consecutive ids: ten zero deltas, which
    // random-access mode run-length codes.
    let graph = VecGraph::new(vec![
        vec![5],
        vec![0, 30],
        (10..=20).collect(),
        vec![2, 40],
    ]);
    let compressed = assert_roundtrip(&graph, true);
    let random_access = CompressedGraph::new(compressed).unwrap();
    assert_eq!(random_access.neighbours(2), graph.neighbours(2));
}

#[test]
fn test_reference_to_vertex_zero_from_vertex_one() {
    // Vertex 1 repeats vertex 0's list, so the cheapest reference
    // offset equals the vertex id exactly.
    let shared: Vec<u32> = vec![0, 3, 4, 7, 9, 11, 13];
    let graph = VecGraph::new(vec![shared.clone(), shared.clone()]);
    for allow_random_access in [false, true] {
        assert_roundtrip(&graph, allow_random_access);
    }
}

#[test]
fn test_empty_graph() {
    let graph = VecGraph::new(Vec::new());
    for allow_random_access in [false, true] {
        let compressed = assert_roundtrip(&graph, allow_random_access);
        assert_eq!(decode_graph_to_vec(&compressed).unwrap().size(), 0);
    }
}

#[test]
fn test_single_vertex_self_loop() {
    let graph = VecGraph::new(vec![vec![0]]);
    for allow_random_access in [false, true] {
        assert_roundtrip(&graph, allow_random_access);
    }
}

#[test]
fn test_degree_zero_vertices() {
    let graph = VecGraph::new(vec![
        Vec::new(),
        vec![0, 2],
        Vec::new(),
        Vec::new(),
        vec![1],
        Vec::new(),
    ]);
    for allow_random_access in [false, true] {
        assert_roundtrip(&graph, allow_random_access);
    }
}

#[test]
fn test_random_graphs_roundtrip() {
    let mut rng = SmallRng::seed_from_u64(0);
    for _ in 0..5 {
        let n = rng.gen_range(1..400);
        let graph = random_graph(n, 20, &mut rng);
        for allow_random_access in [false, true] {
            assert_roundtrip(&graph, allow_random_access);
        }
    }
}

#[test]
fn test_clustered_graphs_roundtrip() {
    let mut rng = SmallRng::seed_from_u64(1);
    for _ in 0..5 {
        let n = rng.gen_range(100..500);
        let graph = clustered_graph(n, &mut rng);
        for allow_random_access in [false, true] {
            assert_roundtrip(&graph, allow_random_access);
        }
    }
}

#[test]
fn test_zero_run_graphs_roundtrip() {
    let mut rng = SmallRng::seed_from_u64(2);
    for _ in 0..5 {
        let n = rng.gen_range(50..300);
        let graph = runs_graph(n, &mut rng);
        for allow_random_access in [false, true] {
            assert_roundtrip(&graph, allow_random_access);
        }
    }
}

#[test]
fn test_degree_chunks_across_boundaries() {
    // More than two degree chunks, with degrees both growing and
    // shrinking across the boundaries.
    let n = 100;
    let lists: Vec<Vec<u32>> = (0..n)
        .map(|i| (0..(i * 7) % 13).map(|x| x as u32).collect())
        .collect();
    let graph = VecGraph::new(lists);
    let compressed = assert_roundtrip(&graph, true);
    let random_access = CompressedGraph::new(compressed).unwrap();
    for i in 0..n {
        assert_eq!(random_access.degree(i), graph.degree(i));
    }
}

#[test]
fn test_random_access_matches_streaming() {
    let mut rng = SmallRng::seed_from_u64(3);
    let graph = clustered_graph(600, &mut rng);
    let compressed = assert_roundtrip(&graph, true);
    let random_access = CompressedGraph::new(compressed).unwrap();
    assert_eq!(random_access.size(), graph.size());
    for _ in 0..100 {
        let i = rng.gen_range(0..graph.size());
        assert_eq!(random_access.degree(i), graph.degree(i), "degree of {}", i);
        assert_eq!(
            random_access.neighbours(i),
            graph.neighbours(i),
            "neighbours of {}",
            i
        );
    }
}

#[test]
fn test_sequential_stream_has_no_random_access() {
    let graph = VecGraph::new(vec![vec![1], vec![0]]);
    let compressed = encode_graph(&graph, false);
    assert!(CompressedGraph::new(compressed).is_err());
}

#[test]
fn test_empty_input_is_rejected() {
    assert!(decode_graph(&[], |_, _| {}).is_err());
}

#[test]
fn test_uncompressed_container_end_to_end() {
    let mut rng = SmallRng::seed_from_u64(4);
    let graph = clustered_graph(300, &mut rng);
    let path = std::env::temp_dir().join("dsi-graph-codec-test-end-to-end.graph");
    store_graph(&graph, &path).unwrap();
    let loaded = UncompressedGraph::load(&path).unwrap();
    assert_eq!(loaded.size(), graph.size());

    let compressed = encode_graph(&loaded, false);
    let decoded = decode_graph_to_vec(&compressed).unwrap();
    assert_eq!(&decoded, &graph);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_traversals_agree_between_representations() {
    let mut rng = SmallRng::seed_from_u64(5);
    let graph = random_graph(200, 6, &mut rng);
    let compressed = encode_graph(&graph, true);
    let random_access = CompressedGraph::new(compressed).unwrap();
    let from_vec = bfs(graph.size(), |i| graph.neighbours(i).to_vec());
    let from_compressed = bfs(random_access.size(), |i| random_access.neighbours(i));
    assert_eq!(from_vec, from_compressed);
    let from_vec = dfs(graph.size(), |i| graph.neighbours(i).to_vec());
    let from_compressed = dfs(random_access.size(), |i| random_access.neighbours(i));
    assert_eq!(from_vec, from_compressed);
}
