// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineOptions;
use crate::document::Document;
use crate::engine::queue::node_queues;
use crate::engine::router::Router;
use crate::engine::runner::{NodeOutcome, NodeReport, StepRunner};
use crate::errors::EngineError;
use crate::observability::messages::engine::{EngineCancelled, EngineCompleted, EngineStarted};
use crate::observability::messages::StructuredLog;
use crate::traits::Step;
use crate::workflow::Workflow;

/// Outcome of one workflow run.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub workflow: String,
    pub nodes: Vec<NodeReport>,
    pub duration: Duration,
}

impl EngineReport {
    pub fn count(&self, outcome: NodeOutcome) -> usize {
        self.nodes.iter().filter(|n| n.outcome == outcome).count()
    }

    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    pub fn all_completed(&self) -> bool {
        self.nodes.iter().all(NodeReport::is_success)
    }
}

/// Runs a resolved workflow: one supervised runner per node, documents routed
/// between them by type.
pub struct Engine {
    workflow: Workflow,
    steps: HashMap<String, Arc<dyn Step>>,
    options: EngineOptions,
}

impl Engine {
    /// `steps` maps step (contract) names to implementations; every node of
    /// the workflow must find its step there.
    pub fn new(
        workflow: Workflow,
        steps: &HashMap<String, Arc<dyn Step>>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        let mut by_node = HashMap::new();
        for node in workflow.nodes() {
            let step = steps.get(node.step()).ok_or_else(|| EngineError::Internal {
                message: format!("no step implementation for '{}' (node '{}')", node.step(), node.id),
            })?;
            by_node.insert(node.id.clone(), Arc::clone(step));
        }
        Ok(Self {
            workflow,
            steps: by_node,
            options,
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Run every node to a terminal state.
    ///
    /// Documents received on `input` go to the root nodes; when `input` closes
    /// or `cancel` fires, the roots see "no more inputs" and the shutdown
    /// cascades downstream. Node failures only fail the run when `fail_hard`
    /// is set.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<Document>,
        cancel: CancellationToken,
    ) -> Result<EngineReport, EngineError> {
        let started = Instant::now();
        EngineStarted {
            workflow: &self.workflow.name,
            node_count: self.workflow.len(),
        }
        .log();

        let (senders, mut inboxes) = node_queues(&self.workflow);
        let router = Router::new(&self.workflow, senders);

        let mut handles = Vec::with_capacity(self.workflow.len());
        for node in self.workflow.nodes() {
            let (Some(inbox), Some(step)) = (inboxes.remove(&node.id), self.steps.get(&node.id)) else {
                return Err(EngineError::Internal {
                    message: format!("node '{}' is not wired", node.id),
                });
            };
            let runner = StepRunner::new(
                node.clone(),
                Arc::clone(step),
                inbox,
                router.clone(),
                self.options.liveness_poll(),
            );
            handles.push(tokio::spawn(runner.run()));
        }

        let pump_router = router.clone();
        let workflow_name = self.workflow.name.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        EngineCancelled { workflow: &workflow_name }.log();
                        break;
                    }
                    next = input.recv() => match next {
                        Some(document) => pump_router.inject(document),
                        None => break,
                    },
                }
            }
            pump_router.input_closed();
        });
        // Runners hold their own router clones.
        drop(router);

        let mut nodes = Vec::with_capacity(handles.len());
        let mut internal = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(report) => nodes.push(report),
                Err(e) => internal = Some(e.to_string()),
            }
        }
        pump.abort();
        if let Some(message) = internal {
            return Err(EngineError::Internal { message });
        }

        let report = EngineReport {
            workflow: self.workflow.name.clone(),
            nodes,
            duration: started.elapsed(),
        };
        EngineCompleted {
            workflow: &report.workflow,
            completed: report.count(NodeOutcome::Completed),
            failed: report.count(NodeOutcome::Failed),
            timed_out: report.count(NodeOutcome::TimedOut),
            duration: report.duration,
        }
        .log();

        if self.options.fail_hard && !report.all_completed() {
            let failures = report
                .nodes
                .iter()
                .filter(|n| !n.is_success())
                .map(|n| match &n.cause {
                    Some(cause) => format!("{}: {}", n.node_id, cause),
                    None => n.node_id.clone(),
                })
                .collect();
            return Err(EngineError::NodeFailures(failures));
        }
        Ok(report)
    }
}
