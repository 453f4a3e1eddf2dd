// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cycle detection over the resolved node graph.
//!
//! Uses depth-first search with a recursion stack ("three colours"): a node
//! reached again while it is still on the stack closes a cycle, and the stack
//! segment from that node onward is the cycle path.
//!
//! **Time Complexity**: O(V + E). **Space Complexity**: O(V).

use std::collections::{HashMap, HashSet};

use crate::workflow::ResolvedNode;

/// Returns the first cycle found, with the starting node repeated at the end.
pub fn find_cycle(nodes: &[ResolvedNode]) -> Option<Vec<String>> {
    let graph: HashMap<&str, Vec<&str>> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.downstream().into_iter().collect()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    // Walk in node order so the reported cycle is stable.
    for node in nodes {
        if !visited.contains(node.id.as_str()) {
            if let Some(cycle) = dfs_cycle_detection(
                node.id.as_str(),
                &graph,
                &mut visited,
                &mut rec_stack,
                &mut path,
            ) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle_detection<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if rec_stack.contains(neighbor) {
                let start = path.iter().position(|n| *n == neighbor).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(neighbor.to_string());
                return Some(cycle);
            }
            if !visited.contains(neighbor) {
                if let Some(cycle) = dfs_cycle_detection(neighbor, graph, visited, rec_stack, path) {
                    return Some(cycle);
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    None
}
