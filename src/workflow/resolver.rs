// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Type-driven workflow resolution.
//!
//! # Algorithm
//!
//! 1. Seed the pending set with every type required by a configured node.
//! 2. For each pending type nobody produces yet, look up producing contracts:
//!    none is `UnsatisfiableType`, several is `AmbiguousProducer` (never
//!    auto-picked), exactly one adds an inferred node whose own requirements
//!    join the pending set.
//! 3. Repeat until every pending type has a producer.
//! 4. Reject types produced by more than one node (`DuplicateProducer`).
//! 5. Give id-less nodes the default id `step-<position>` and reject clashes
//!    (`DuplicateNodeId`).
//! 6. Build each node's fan-out table from produced and required types.
//! 7. Reject cycles (`CyclicWorkflow`).
//!
//! Type names are visited in sorted order so the same inputs always yield the
//! same graph.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::WorkflowNodeSpec;
use crate::contract::{ContractRegistry, StepContract};
use crate::errors::ConfigurationError;
use crate::observability::messages::workflow::{ProducerInferred, WorkflowResolved};
use crate::observability::messages::StructuredLog;
use crate::workflow::validation::find_cycle;
use crate::workflow::{ResolvedNode, Workflow};

struct PendingNode {
    spec: WorkflowNodeSpec,
    contract: StepContract,
    inferred: bool,
}

/// Resolve configured node specs against `registry` into a wired workflow.
pub fn resolve(
    name: &str,
    specs: &[WorkflowNodeSpec],
    registry: &ContractRegistry,
) -> Result<Workflow, ConfigurationError> {
    let mut nodes = bind_configured(specs, registry)?;
    infer_producers(&mut nodes, registry)?;
    check_single_producer(&nodes)?;
    let ids = assign_ids(&nodes)?;
    let resolved = wire_outputs(nodes, ids);

    if let Some(cycle) = find_cycle(&resolved) {
        return Err(ConfigurationError::CyclicWorkflow { cycle });
    }

    let inferred = resolved.iter().filter(|n| n.inferred).count();
    WorkflowResolved {
        workflow: name,
        configured: resolved.len() - inferred,
        inferred,
    }
    .log();

    Ok(Workflow::new(name.to_string(), resolved))
}

fn bind_configured(
    specs: &[WorkflowNodeSpec],
    registry: &ContractRegistry,
) -> Result<Vec<PendingNode>, ConfigurationError> {
    specs
        .iter()
        .enumerate()
        .map(|(position, spec)| {
            let contract = registry.get(&spec.step).ok_or_else(|| {
                ConfigurationError::UnknownStep {
                    node: spec
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("#{}", position + 1)),
                    step: spec.step.clone(),
                }
            })?;
            Ok(PendingNode {
                spec: spec.clone(),
                contract: contract.clone(),
                inferred: false,
            })
        })
        .collect()
}

fn infer_producers(
    nodes: &mut Vec<PendingNode>,
    registry: &ContractRegistry,
) -> Result<(), ConfigurationError> {
    let mut produced: HashSet<String> = nodes
        .iter()
        .flat_map(|n| n.contract.produced_types.iter().cloned())
        .collect();
    let mut pending: BTreeSet<String> = nodes
        .iter()
        .flat_map(|n| n.contract.required_types.iter().cloned())
        .collect();

    loop {
        let unresolved: Vec<String> = pending
            .iter()
            .filter(|t| !produced.contains(*t))
            .cloned()
            .collect();
        if unresolved.is_empty() {
            return Ok(());
        }

        for doc_type in unresolved {
            if produced.contains(&doc_type) {
                continue;
            }
            let candidates = registry.producers_of(&doc_type);
            let contract = match candidates.as_slice() {
                [] => return Err(ConfigurationError::UnsatisfiableType { doc_type }),
                [only] => registry.get(only).cloned().ok_or_else(|| {
                    ConfigurationError::UnsatisfiableType {
                        doc_type: doc_type.clone(),
                    }
                })?,
                many => {
                    return Err(ConfigurationError::AmbiguousProducer {
                        doc_type,
                        candidates: many.iter().map(|c| c.to_string()).collect(),
                    })
                }
            };

            ProducerInferred {
                doc_type: &doc_type,
                step: &contract.name,
            }
            .log();

            produced.extend(contract.produced_types.iter().cloned());
            pending.extend(contract.required_types.iter().cloned());
            nodes.push(PendingNode {
                spec: WorkflowNodeSpec::new(contract.name.clone()),
                contract,
                inferred: true,
            });
        }
    }
}

fn check_single_producer(nodes: &[PendingNode]) -> Result<(), ConfigurationError> {
    let mut producers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (position, node) in nodes.iter().enumerate() {
        for doc_type in &node.contract.produced_types {
            producers
                .entry(doc_type.as_str())
                .or_default()
                .push(display_id(node, position));
        }
    }

    match producers.into_iter().find(|(_, ids)| ids.len() > 1) {
        Some((doc_type, nodes)) => Err(ConfigurationError::DuplicateProducer {
            doc_type: doc_type.to_string(),
            nodes,
        }),
        None => Ok(()),
    }
}

fn display_id(node: &PendingNode, position: usize) -> String {
    node.spec
        .id
        .clone()
        .unwrap_or_else(|| default_id(position))
}

fn default_id(position: usize) -> String {
    format!("step-{}", position + 1)
}

fn assign_ids(nodes: &[PendingNode]) -> Result<Vec<String>, ConfigurationError> {
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(nodes.len());
    for (position, node) in nodes.iter().enumerate() {
        let id = display_id(node, position);
        if !seen.insert(id.clone()) {
            return Err(ConfigurationError::DuplicateNodeId { node_id: id });
        }
        ids.push(id);
    }
    Ok(ids)
}

fn wire_outputs(nodes: Vec<PendingNode>, ids: Vec<String>) -> Vec<ResolvedNode> {
    let requirements: Vec<(&String, &BTreeSet<String>)> = ids
        .iter()
        .zip(nodes.iter().map(|n| &n.contract.required_types))
        .collect();

    let tables: Vec<BTreeMap<String, Vec<String>>> = nodes
        .iter()
        .map(|node| {
            node.contract
                .produced_types
                .iter()
                .map(|doc_type| {
                    let consumers = requirements
                        .iter()
                        .filter(|(_, required)| required.contains(doc_type))
                        .map(|(id, _)| (*id).clone())
                        .collect();
                    (doc_type.clone(), consumers)
                })
                .collect()
        })
        .collect();

    nodes
        .into_iter()
        .zip(ids)
        .zip(tables)
        .map(|((node, id), outputs)| ResolvedNode {
            id,
            contract: node.contract,
            params: node.spec.params,
            outputs,
            inferred: node.inferred,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(contracts: Vec<StepContract>) -> ContractRegistry {
        contracts.into_iter().collect()
    }

    #[test]
    fn test_consumer_gets_default_id_and_fan_out() {
        let registry = registry(vec![
            StepContract::new("producer", 5).produces(["T1"]),
            StepContract::new("consumer", 5).requires(["T1"]).produces(["T2"]),
        ]);
        let specs = vec![
            WorkflowNodeSpec::new("producer").with_id("source"),
            WorkflowNodeSpec::new("consumer"),
        ];

        let workflow = resolve("wf", &specs, &registry).unwrap();
        assert_eq!(workflow.len(), 2);
        let source = workflow.node("source").unwrap();
        assert_eq!(source.consumers_of("T1"), &["step-2".to_string()]);
        let consumer = workflow.node("step-2").unwrap();
        assert_eq!(consumer.step(), "consumer");
        assert!(consumer.consumers_of("T2").is_empty());
        assert_eq!(workflow.upstream_of("step-2").into_iter().collect::<Vec<_>>(), vec!["source"]);
    }

    #[test]
    fn test_missing_producer_is_inferred_transitively() {
        let registry = registry(vec![
            StepContract::new("qstat", 5).produces(["pbs.qstat"]),
            StepContract::new("jobs", 5).requires(["pbs.qstat"]).produces(["activities.json"]),
            StepContract::new("publish", 5).requires(["activities.json"]),
        ]);
        let specs = vec![WorkflowNodeSpec::new("publish")];

        let workflow = resolve("wf", &specs, &registry).unwrap();
        let steps: Vec<(&str, &str, bool)> = workflow
            .nodes()
            .iter()
            .map(|n| (n.id.as_str(), n.step(), n.inferred))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("step-1", "publish", false),
                ("step-2", "jobs", true),
                ("step-3", "qstat", true),
            ]
        );
        assert_eq!(workflow.roots().count(), 1);
    }

    #[test]
    fn test_ambiguous_producer_is_never_auto_picked() {
        let registry = registry(vec![
            StepContract::new("pbs_activities", 5).produces(["activities.json"]),
            StepContract::new("sge_activities", 5).produces(["activities.json"]),
            StepContract::new("publish", 5).requires(["activities.json"]),
        ]);

        let err = resolve("wf", &[WorkflowNodeSpec::new("publish")], &registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::AmbiguousProducer {
                doc_type: "activities.json".to_string(),
                candidates: vec!["pbs_activities".to_string(), "sge_activities".to_string()],
            }
        );
    }

    #[test]
    fn test_pinning_a_producer_resolves_ambiguity() {
        let registry = registry(vec![
            StepContract::new("pbs_activities", 5).produces(["activities.json"]),
            StepContract::new("sge_activities", 5).produces(["activities.json"]),
            StepContract::new("publish", 5).requires(["activities.json"]),
        ]);
        let specs = vec![
            WorkflowNodeSpec::new("publish"),
            WorkflowNodeSpec::new("sge_activities"),
        ];

        let workflow = resolve("wf", &specs, &registry).unwrap();
        assert_eq!(workflow.len(), 2);
        assert_eq!(
            workflow.node("step-2").unwrap().consumers_of("activities.json"),
            &["step-1".to_string()]
        );
    }

    #[test]
    fn test_unsatisfiable_type() {
        let registry = registry(vec![StepContract::new("publish", 5).requires(["nobody.makes.this"])]);
        let err = resolve("wf", &[WorkflowNodeSpec::new("publish")], &registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnsatisfiableType {
                doc_type: "nobody.makes.this".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_explicit_ids() {
        let registry = registry(vec![
            StepContract::new("a", 5).produces(["A"]),
            StepContract::new("b", 5).produces(["B"]),
        ]);
        let specs = vec![
            WorkflowNodeSpec::new("a").with_id("same"),
            WorkflowNodeSpec::new("b").with_id("same"),
        ];
        let err = resolve("wf", &specs, &registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicateNodeId {
                node_id: "same".to_string()
            }
        );
    }

    #[test]
    fn test_explicit_id_colliding_with_default_id() {
        let registry = registry(vec![
            StepContract::new("a", 5).produces(["A"]),
            StepContract::new("b", 5).produces(["B"]),
        ]);
        let specs = vec![
            WorkflowNodeSpec::new("a").with_id("step-2"),
            WorkflowNodeSpec::new("b"),
        ];
        assert!(matches!(
            resolve("wf", &specs, &registry),
            Err(ConfigurationError::DuplicateNodeId { .. })
        ));
    }

    #[test]
    fn test_two_configured_producers_of_one_type() {
        let registry = registry(vec![
            StepContract::new("a", 5).produces(["T"]),
            StepContract::new("b", 5).produces(["T"]),
        ]);
        let specs = vec![WorkflowNodeSpec::new("a"), WorkflowNodeSpec::new("b")];
        assert_eq!(
            resolve("wf", &specs, &registry).unwrap_err(),
            ConfigurationError::DuplicateProducer {
                doc_type: "T".to_string(),
                nodes: vec!["step-1".to_string(), "step-2".to_string()],
            }
        );
    }

    #[test]
    fn test_unknown_step() {
        let registry = registry(vec![]);
        let err = resolve("wf", &[WorkflowNodeSpec::new("ghost")], &registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownStep {
                node: "#1".to_string(),
                step: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let registry = registry(vec![
            StepContract::new("a", 5).requires(["B"]).produces(["A"]),
            StepContract::new("b", 5).requires(["A"]).produces(["B"]),
        ]);
        let err = resolve("wf", &[WorkflowNodeSpec::new("a")], &registry).unwrap_err();
        match err {
            ConfigurationError::CyclicWorkflow { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 3);
            }
            other => panic!("expected CyclicWorkflow, got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = registry(vec![
            StepContract::new("q1", 5).produces(["x1"]),
            StepContract::new("q2", 5).produces(["x2"]),
            StepContract::new("q3", 5).requires(["x1", "x2"]).produces(["x3", "x4"]),
            StepContract::new("p1", 5).requires(["x3"]),
            StepContract::new("p2", 5).requires(["x4", "x1"]),
        ]);
        let specs = vec![
            WorkflowNodeSpec::new("p2").with_param("mode", "fast"),
            WorkflowNodeSpec::new("p1").with_id("publisher"),
        ];

        let first = resolve("wf", &specs, &registry).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve("wf", &specs, &registry).unwrap(), first);
        }
        assert_eq!(
            first.node("step-4").unwrap().consumers_of("x1"),
            &["step-1".to_string(), "step-3".to_string()]
        );
    }
}
