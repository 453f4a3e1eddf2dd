// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Supervision of a single workflow node.
//!
//! # State machine
//!
//! ```text
//! Created --start--> Running --no more inputs--> Draining --exit 0--> Completed
//!    |                  |                           |------exit != 0--> Failed
//!    |                  |                           `--budget spent---> TimedOut
//!    `--spawn error--> Failed <--malformed output---'
//! ```
//!
//! While running, a collector task moves documents from the node's inbox onto
//! a local queue that a feeder task writes into the step. A drainer task
//! forwards step outputs to the [`Router`]. Once every upstream is done the
//! collector finishes, which starts the drain clock. The feeder closes the
//! step's input after writing what is still queued. The supervisor then polls
//! liveness and kills the step if it outlives its `time_out`, even when the
//! step never read its input. Whatever the outcome, consumers are told this
//! node is done.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::document::Document;
use crate::engine::queue::NodeInbox;
use crate::engine::router::Router;
use crate::errors::StepError;
use crate::observability::messages::step::{
    FeedFailed, NodeCompleted, NodeFailed, NodeTimedOut, RunnerTransition, StepDiagnostics,
    UndeclaredOutput,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{DocumentReader, DocumentWriter, Step, StepControl};
use crate::workflow::ResolvedNode;

/// Longest wait for trailing output once the step is gone.
const DRAINER_JOIN_LIMIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Running,
    Draining,
    Completed,
    TimedOut,
    Failed,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Created => "created",
            RunnerState::Running => "running",
            RunnerState::Draining => "draining",
            RunnerState::Completed => "completed",
            RunnerState::TimedOut => "timed_out",
            RunnerState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerState::Completed | RunnerState::TimedOut | RunnerState::Failed
        )
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed,
    TimedOut,
    Failed,
}

/// Terminal summary of one node.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node_id: String,
    pub step: String,
    pub outcome: NodeOutcome,
    pub cause: Option<StepError>,
    pub inputs: usize,
    pub outputs: usize,
    pub duration: Duration,
    pub diagnostics: Option<String>,
}

impl NodeReport {
    pub fn is_success(&self) -> bool {
        self.outcome == NodeOutcome::Completed
    }
}

/// How the running phase ended.
enum RunningEnd {
    InputClosed,
    Exited(Result<(), StepError>),
    OutputBroken(StepError),
}

/// Supervises one node from spawn to terminal state.
pub struct StepRunner {
    node: ResolvedNode,
    step: Arc<dyn Step>,
    inbox: Option<NodeInbox>,
    router: Router,
    liveness_poll: Duration,
    state: RunnerState,
}

impl StepRunner {
    pub fn new(
        node: ResolvedNode,
        step: Arc<dyn Step>,
        inbox: NodeInbox,
        router: Router,
        liveness_poll: Duration,
    ) -> Self {
        Self {
            node,
            step,
            inbox: Some(inbox),
            router,
            liveness_poll,
            state: RunnerState::Created,
        }
    }

    fn transition(&mut self, to: RunnerState) {
        RunnerTransition {
            node_id: &self.node.id,
            from: self.state.as_str(),
            to: to.as_str(),
        }
        .log();
        self.state = to;
    }

    /// Drive the node to a terminal state and notify its consumers.
    pub async fn run(self) -> NodeReport {
        let span = RunnerTransition {
            node_id: &self.node.id,
            from: self.state.as_str(),
            to: RunnerState::Running.as_str(),
        }
        .span("node");

        let node_id = self.node.id.clone();
        let router = self.router.clone();
        let report = self.supervise().instrument(span).await;
        router.node_done(&node_id);
        report
    }

    async fn supervise(mut self) -> NodeReport {
        let started = Instant::now();
        let inputs = Arc::new(AtomicUsize::new(0));
        let outputs = Arc::new(AtomicUsize::new(0));

        let execution = match self.step.start(&self.node.id, &self.node.params).await {
            Ok(execution) => execution,
            Err(error) => {
                self.transition(RunnerState::Failed);
                return self.report(started, Some(error), 0, 0, None);
            }
        };
        self.transition(RunnerState::Running);

        let mut control = execution.control;
        let Some(inbox) = self.inbox.take() else {
            self.transition(RunnerState::Failed);
            let error = StepError::Runtime("node inbox already consumed".to_string());
            return self.report(started, Some(error), 0, 0, None);
        };
        let (queued_tx, queued_rx) = mpsc::unbounded_channel();
        let mut collector = tokio::spawn(collect_inputs(inbox, queued_tx));
        let feeder = tokio::spawn(feed(
            self.node.id.clone(),
            queued_rx,
            execution.writer,
            Arc::clone(&inputs),
        ));
        let mut drainer = tokio::spawn(drain(
            self.node.id.clone(),
            self.node.contract.produced_types.clone(),
            execution.reader,
            self.router.clone(),
            Arc::clone(&outputs),
        ));
        let mut drained: Option<Result<(), StepError>> = None;

        let mut ticker = tokio::time::interval(self.liveness_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let running_end = loop {
            tokio::select! {
                _ = &mut collector => break RunningEnd::InputClosed,
                joined = &mut drainer, if drained.is_none() => {
                    let result = flatten(joined);
                    if let Err(error) = result {
                        break RunningEnd::OutputBroken(error);
                    }
                    drained = Some(Ok(()));
                }
                _ = ticker.tick() => {
                    if let Some(exit) = control.try_wait().await {
                        break RunningEnd::Exited(exit);
                    }
                }
            }
        };

        let (state, cause) = match running_end {
            RunningEnd::InputClosed => {
                self.transition(RunnerState::Draining);
                let budget = self.node.contract.drain_budget();
                await_exit(budget, &mut control, &mut drainer, &mut drained, &mut ticker).await
            }
            RunningEnd::Exited(exit) => {
                collector.abort();
                exit_state(exit)
            }
            RunningEnd::OutputBroken(error) => {
                collector.abort();
                control.kill().await;
                drained = Some(Err(error.clone()));
                (RunnerState::Failed, Some(error))
            }
        };
        // A write may still be blocked on a step that never read its input.
        feeder.abort();

        if drained.is_none() {
            match tokio::time::timeout(DRAINER_JOIN_LIMIT, &mut drainer).await {
                Ok(joined) => drained = Some(flatten(joined)),
                Err(_) => drainer.abort(),
            }
        }

        // A clean exit with a broken output stream still fails the node.
        let (state, cause) = match (state, drained) {
            (RunnerState::Completed, Some(Err(error))) => (RunnerState::Failed, Some(error)),
            (state, _) => (state, cause),
        };

        let diagnostics = control.diagnostics().await;
        if let Some(text) = &diagnostics {
            StepDiagnostics {
                node_id: &self.node.id,
                text,
            }
            .log();
        }

        self.transition(state);
        self.report(
            started,
            cause,
            inputs.load(Ordering::SeqCst),
            outputs.load(Ordering::SeqCst),
            diagnostics,
        )
    }

    fn report(
        &self,
        started: Instant,
        cause: Option<StepError>,
        inputs: usize,
        outputs: usize,
        diagnostics: Option<String>,
    ) -> NodeReport {
        let duration = started.elapsed();
        let step = self.node.step();
        let outcome = match self.state {
            RunnerState::Completed => NodeOutcome::Completed,
            RunnerState::TimedOut => NodeOutcome::TimedOut,
            _ => NodeOutcome::Failed,
        };

        match (&outcome, &cause) {
            (NodeOutcome::Completed, _) => NodeCompleted {
                node_id: &self.node.id,
                step,
                inputs,
                outputs,
                duration,
            }
            .log(),
            (NodeOutcome::TimedOut, _) => NodeTimedOut {
                node_id: &self.node.id,
                step,
                budget: self.node.contract.drain_budget(),
            }
            .log(),
            (NodeOutcome::Failed, Some(error)) => NodeFailed {
                node_id: &self.node.id,
                step,
                error,
            }
            .log(),
            (NodeOutcome::Failed, None) => {}
        }

        NodeReport {
            node_id: self.node.id.clone(),
            step: step.to_string(),
            outcome,
            cause,
            inputs,
            outputs,
            duration,
            diagnostics,
        }
    }
}

/// Draining phase: poll liveness until exit or until the budget is spent.
async fn await_exit(
    budget: Duration,
    control: &mut Box<dyn StepControl>,
    drainer: &mut JoinHandle<Result<(), StepError>>,
    drained: &mut Option<Result<(), StepError>>,
    ticker: &mut tokio::time::Interval,
) -> (RunnerState, Option<StepError>) {
    let drain_start = Instant::now();
    loop {
        tokio::select! {
            joined = &mut *drainer, if drained.is_none() => {
                let result = flatten(joined);
                if let Err(error) = &result {
                    control.kill().await;
                    *drained = Some(result.clone());
                    return (RunnerState::Failed, Some(error.clone()));
                }
                *drained = Some(result);
            }
            _ = ticker.tick() => {
                if let Some(exit) = control.try_wait().await {
                    return exit_state(exit);
                }
                if drain_start.elapsed() > budget {
                    control.kill().await;
                    return (RunnerState::TimedOut, Some(StepError::Timeout(budget)));
                }
            }
        }
    }
}

fn exit_state(exit: Result<(), StepError>) -> (RunnerState, Option<StepError>) {
    match exit {
        Ok(()) => (RunnerState::Completed, None),
        Err(error) => (RunnerState::Failed, Some(error)),
    }
}

fn flatten(joined: Result<Result<(), StepError>, tokio::task::JoinError>) -> Result<(), StepError> {
    joined.unwrap_or_else(|e| Err(StepError::Runtime(e.to_string())))
}

/// Moves inbox documents onto the feeder's queue until every upstream is done.
async fn collect_inputs(mut inbox: NodeInbox, queued: mpsc::UnboundedSender<Document>) {
    while let Some(document) = inbox.next_document().await {
        if queued.send(document).is_err() {
            break;
        }
    }
}

/// Writes queued documents into the step, then closes the step's input.
async fn feed(
    node_id: String,
    mut queued: mpsc::UnboundedReceiver<Document>,
    mut writer: Box<dyn DocumentWriter>,
    fed: Arc<AtomicUsize>,
) {
    let mut broken = false;
    while let Some(document) = queued.recv().await {
        if broken {
            continue;
        }
        let document_id = document.id.clone();
        match writer.write(document).await {
            Ok(()) => {
                fed.fetch_add(1, Ordering::SeqCst);
            }
            Err(error) => {
                FeedFailed {
                    node_id: &node_id,
                    document_id: &document_id,
                    error: &error,
                }
                .log();
                broken = true;
            }
        }
    }
    if let Err(error) = writer.close().await {
        tracing::debug!(node_id = %node_id, error = %error, "closing step input failed");
    }
}

/// Forwards step outputs to the router until the output stream ends.
///
/// Only a malformed frame is an error; any other read failure just ends the
/// stream.
async fn drain(
    node_id: String,
    produced: BTreeSet<String>,
    mut reader: Box<dyn DocumentReader>,
    router: Router,
    emitted: Arc<AtomicUsize>,
) -> Result<(), StepError> {
    while let Some(next) = reader.next().await {
        let document = match next {
            Ok(document) => document,
            Err(error @ StepError::MalformedFrame(_)) => return Err(error),
            Err(error) => {
                tracing::debug!(node_id = %node_id, error = %error, "step output closed");
                break;
            }
        };
        if !produced.contains(&document.doc_type) {
            UndeclaredOutput {
                node_id: &node_id,
                document_id: &document.id,
                doc_type: &document.doc_type,
            }
            .log();
            continue;
        }
        emitted.fetch_add(1, Ordering::SeqCst);
        router.route(&node_id, document.from_node(&node_id));
    }
    Ok(())
}
