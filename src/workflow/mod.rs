// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Resolved workflows: configured nodes bound to contracts and wired by type.
//!
//! [`resolve`] turns the operator's node list into a [`Workflow`], inferring
//! producer nodes for any required type nobody configured. Everything here
//! happens before a single process is spawned, so configuration mistakes fail
//! fast.

mod resolver;
mod validation;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::contract::StepContract;

pub use resolver::resolve;
pub use validation::find_cycle;

/// A node of a resolved workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedNode {
    pub id: String,
    pub contract: StepContract,
    pub params: Map<String, Value>,
    /// Fan-out table: produced type -> ids of the nodes requiring it
    pub outputs: BTreeMap<String, Vec<String>>,
    /// True when the resolver added the node to satisfy a required type
    pub inferred: bool,
}

impl ResolvedNode {
    pub fn step(&self) -> &str {
        &self.contract.name
    }

    /// Consumers of `doc_type`, empty when nobody needs it.
    pub fn consumers_of(&self, doc_type: &str) -> &[String] {
        self.outputs.get(doc_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every distinct downstream node id.
    pub fn downstream(&self) -> BTreeSet<&str> {
        self.outputs
            .values()
            .flat_map(|ids| ids.iter().map(String::as_str))
            .collect()
    }
}

/// A fully resolved, type-wired graph of nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub name: String,
    nodes: Vec<ResolvedNode>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Workflow {
    pub(crate) fn new(name: String, nodes: Vec<ResolvedNode>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { name, nodes, index }
    }

    pub fn nodes(&self) -> &[ResolvedNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ResolvedNode> {
        self.index.get(id).map(|i| &self.nodes[*i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct producer node ids feeding `id`.
    pub fn upstream_of(&self, id: &str) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter(|n| n.downstream().contains(id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Nodes with no required types; they are fed from the engine input.
    pub fn roots(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter().filter(|n| n.contract.is_root())
    }
}
