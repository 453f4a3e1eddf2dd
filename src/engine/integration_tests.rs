// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backends::stub::{local, CollectStep, EmitStep, FailingStep, UppercaseStep};
use crate::config::{EngineOptions, WorkflowNodeSpec};
use crate::contract::{ContractRegistry, StepContract};
use crate::document::Document;
use crate::engine::{Engine, NodeOutcome};
use crate::errors::EngineError;
use crate::traits::Step;
use crate::workflow::resolve;

/// Integration tests running whole workflows of in-process steps
#[cfg(test)]
mod tests {
    use super::*;

    fn options(fail_hard: bool) -> EngineOptions {
        EngineOptions {
            liveness_poll_ms: 10,
            fail_hard,
            ..EngineOptions::default()
        }
    }

    fn catalog(steps: Vec<Arc<dyn Step>>) -> (ContractRegistry, HashMap<String, Arc<dyn Step>>) {
        let registry = steps.iter().map(|s| s.contract().clone()).collect();
        let by_name = steps
            .into_iter()
            .map(|s| (s.contract().name.clone(), s))
            .collect();
        (registry, by_name)
    }

    fn closed_input() -> mpsc::Receiver<Document> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    /// A fails; the chain C -> B -> D does not depend on A and still delivers.
    fn partial_failure_workflow(
        collected: &CollectStep,
        orphan: &CollectStep,
    ) -> (ContractRegistry, HashMap<String, Arc<dyn Step>>) {
        catalog(vec![
            local(StepContract::new("a", 1).produces(["a.out"]), FailingStep),
            local(
                StepContract::new("c", 1).produces(["c.out"]),
                EmitStep::new(vec![Document::new("c1", "c.out", "hello")]),
            ),
            local(
                StepContract::new("b", 1).requires(["c.out"]).produces(["c.out.upper"]),
                UppercaseStep,
            ),
            local(StepContract::new("d", 1).requires(["c.out.upper"]), collected.clone()),
            local(StepContract::new("e", 1).requires(["a.out"]), orphan.clone()),
        ])
    }

    #[tokio::test]
    async fn test_partial_failure_independence() {
        let collected = CollectStep::default();
        let orphan = CollectStep::default();
        let (registry, steps) = partial_failure_workflow(&collected, &orphan);
        let specs = vec![WorkflowNodeSpec::new("d"), WorkflowNodeSpec::new("e")];
        let workflow = resolve("partial", &specs, &registry).unwrap();

        let engine = Engine::new(workflow, &steps, options(false)).unwrap();
        let report = engine
            .run(closed_input(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.nodes.len(), 5);
        assert_eq!(report.count(NodeOutcome::Failed), 1);
        assert_eq!(report.count(NodeOutcome::Completed), 4);

        let seen = collected.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].doc_type, "c.out.upper");
        assert_eq!(&seen[0].body[..], b"HELLO");

        // The consumer of the failed producer finished gracefully with nothing.
        assert!(orphan.seen().is_empty());
        let orphan_report = report.node("step-2").unwrap();
        assert_eq!(orphan_report.step, "e");
        assert_eq!(orphan_report.outcome, NodeOutcome::Completed);
        assert_eq!(orphan_report.inputs, 0);
    }

    #[tokio::test]
    async fn test_fail_hard_surfaces_node_failures() {
        let collected = CollectStep::default();
        let orphan = CollectStep::default();
        let (registry, steps) = partial_failure_workflow(&collected, &orphan);
        let specs = vec![WorkflowNodeSpec::new("d"), WorkflowNodeSpec::new("e")];
        let workflow = resolve("partial", &specs, &registry).unwrap();

        let engine = Engine::new(workflow, &steps, options(true)).unwrap();
        match engine.run(closed_input(), CancellationToken::new()).await {
            Err(EngineError::NodeFailures(failures)) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("simulated step failure"));
            }
            other => panic!("expected NodeFailures, got {:?}", other.map(|r| r.nodes.len())),
        }
        // Independent work still happened before the run was failed.
        assert_eq!(collected.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_documents_reach_root_nodes() {
        let collected = CollectStep::default();
        let (registry, steps) = catalog(vec![
            local(StepContract::new("upper", 1).produces(["text.upper"]), UppercaseStep),
            local(StepContract::new("out", 1).requires(["text.upper"]), collected.clone()),
        ]);
        let workflow = resolve("inject", &[WorkflowNodeSpec::new("out")], &registry).unwrap();
        let engine = Engine::new(workflow, &steps, options(false)).unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(Document::new("1", "text", "abc")).await.unwrap();
        tx.send(Document::new("2", "text", "def")).await.unwrap();
        drop(tx);

        let report = engine.run(rx, CancellationToken::new()).await.unwrap();
        assert!(report.all_completed());
        let bodies: Vec<Vec<u8>> = collected.seen().iter().map(|d| d.body.to_vec()).collect();
        assert_eq!(bodies, vec![b"ABC".to_vec(), b"DEF".to_vec()]);
    }

    #[tokio::test]
    async fn test_cancellation_cascades_no_more_inputs() {
        let collected = CollectStep::default();
        let (registry, steps) = catalog(vec![
            local(
                StepContract::new("src", 1).produces(["t"]),
                EmitStep::new(vec![Document::new("x", "t", "1")]),
            ),
            local(StepContract::new("out", 1).requires(["t"]), collected.clone()),
        ]);
        let workflow = resolve("cancel", &[WorkflowNodeSpec::new("out")], &registry).unwrap();
        let engine = Engine::new(workflow, &steps, options(false)).unwrap();

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(5), engine.run(rx, cancel))
            .await
            .expect("engine did not stop after cancellation")
            .unwrap();
        assert!(report.all_completed());
        assert_eq!(collected.seen().len(), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn test_missing_step_implementation() {
        let registry: ContractRegistry = vec![StepContract::new("ghost", 1)].into_iter().collect();
        let workflow = resolve("w", &[WorkflowNodeSpec::new("ghost")], &registry).unwrap();
        let result = Engine::new(workflow, &HashMap::new(), options(false));
        assert!(matches!(result, Err(EngineError::Internal { .. })));
    }

    /// The shipped file-publish config end to end: two discovered scripts,
    /// one inferred node, the built-in publish step writing the result.
    #[tokio::test]
    async fn test_file_publish_config_end_to_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("compute.json");

        let mut config = crate::config::load_config("configs/file-publish.yaml").unwrap();
        config.engine.liveness_poll_ms = 10;
        for entry in &mut config.publish {
            if let crate::config::SinkConfig::File(file) = &mut entry.sink {
                file.path = output.clone();
            }
        }

        let catalog = crate::backends::StepCatalog::from_config(&config).await.unwrap();
        let workflow = resolve(&config.workflow.name, &config.workflow.nodes, catalog.registry()).unwrap();
        assert!(workflow.node("step-3").map_or(false, |n| n.inferred));

        let engine = Engine::new(workflow, catalog.steps(), config.engine.clone()).unwrap();
        let report = engine.run(closed_input(), CancellationToken::new()).await.unwrap();

        assert!(report.all_completed(), "{:?}", report.nodes);
        assert_eq!(report.node("out").unwrap().inputs, 1);
        let written = std::fs::read_to_string(&output).unwrap();
        let record: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(record["site"], "example.org");
        assert!(record["facts"]["cpus"].as_u64().unwrap() >= 1);
    }
}
