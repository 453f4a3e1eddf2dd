// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for step discovery and the step runner lifecycle.

use crate::contract::StepContract;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// A step program described itself successfully.
///
/// # Log Level
/// `debug!`
pub struct ContractDiscovered<'a> {
    pub program: &'a str,
    pub contract: &'a StepContract,
}

impl Display for ContractDiscovered<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Discovered step '{}' from {}: requires [{}], produces [{}], time_out={}s",
            self.contract.name,
            self.program,
            join(&self.contract.required_types),
            join(&self.contract.produced_types),
            self.contract.time_out
        )
    }
}

impl StructuredLog for ContractDiscovered<'_> {
    fn log(&self) {
        tracing::debug!(
            program = self.program,
            step = %self.contract.name,
            time_out = self.contract.time_out,
            "{}", self
        );
    }
}

/// A runner moved between states.
///
/// # Log Level
/// `debug!`
pub struct RunnerTransition<'a> {
    pub node_id: &'a str,
    pub from: &'a str,
    pub to: &'a str,
}

impl Display for RunnerTransition<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Node '{}': {} -> {}", self.node_id, self.from, self.to)
    }
}

impl StructuredLog for RunnerTransition<'_> {
    fn log(&self) {
        tracing::debug!(node_id = self.node_id, from = self.from, to = self.to, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("runner", span_name = name, node_id = self.node_id)
    }
}

/// A node finished normally.
///
/// # Log Level
/// `info!`
pub struct NodeCompleted<'a> {
    pub node_id: &'a str,
    pub step: &'a str,
    pub inputs: usize,
    pub outputs: usize,
    pub duration: Duration,
}

impl Display for NodeCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Node '{}' ({}) completed: {} input(s), {} output(s) in {:?}",
            self.node_id, self.step, self.inputs, self.outputs, self.duration
        )
    }
}

impl StructuredLog for NodeCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            node_id = self.node_id,
            step = self.step,
            inputs = self.inputs,
            outputs = self.outputs,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }
}

/// A node was forcibly terminated after exceeding its drain budget.
///
/// # Log Level
/// `error!`
pub struct NodeTimedOut<'a> {
    pub node_id: &'a str,
    pub step: &'a str,
    pub budget: Duration,
}

impl Display for NodeTimedOut<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Node '{}' ({}) did not finish within {:?} of its input closing; terminated",
            self.node_id, self.step, self.budget
        )
    }
}

impl StructuredLog for NodeTimedOut<'_> {
    fn log(&self) {
        tracing::error!(
            node_id = self.node_id,
            step = self.step,
            budget_ms = self.budget.as_millis() as u64,
            "{}", self
        );
    }
}

/// A node failed.
///
/// # Log Level
/// `error!`
pub struct NodeFailed<'a> {
    pub node_id: &'a str,
    pub step: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for NodeFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Node '{}' ({}) failed: {}", self.node_id, self.step, self.error)
    }
}

impl StructuredLog for NodeFailed<'_> {
    fn log(&self) {
        tracing::error!(
            node_id = self.node_id,
            step = self.step,
            error = %self.error,
            "{}", self
        );
    }
}

/// A step wrote diagnostic text to standard error.
///
/// # Log Level
/// `warn!`
pub struct StepDiagnostics<'a> {
    pub node_id: &'a str,
    pub text: &'a str,
}

impl Display for StepDiagnostics<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Node '{}' stderr: {}", self.node_id, self.text)
    }
}

impl StructuredLog for StepDiagnostics<'_> {
    fn log(&self) {
        tracing::warn!(node_id = self.node_id, "{}", self);
    }
}

/// A step emitted a document type its contract does not declare.
///
/// # Log Level
/// `warn!`
pub struct UndeclaredOutput<'a> {
    pub node_id: &'a str,
    pub document_id: &'a str,
    pub doc_type: &'a str,
}

impl Display for UndeclaredOutput<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Node '{}' emitted document '{}' of undeclared type '{}'; dropped",
            self.node_id, self.document_id, self.doc_type
        )
    }
}

impl StructuredLog for UndeclaredOutput<'_> {
    fn log(&self) {
        tracing::warn!(
            node_id = self.node_id,
            document_id = self.document_id,
            doc_type = self.doc_type,
            "{}", self
        );
    }
}

/// Writing an input document to a step failed; later inputs are discarded.
///
/// # Log Level
/// `warn!`
pub struct FeedFailed<'a> {
    pub node_id: &'a str,
    pub document_id: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for FeedFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Node '{}' could not accept document '{}': {}",
            self.node_id, self.document_id, self.error
        )
    }
}

impl StructuredLog for FeedFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            node_id = self.node_id,
            document_id = self.document_id,
            error = %self.error,
            "{}", self
        );
    }
}

fn join(types: &std::collections::BTreeSet<String>) -> String {
    types.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
