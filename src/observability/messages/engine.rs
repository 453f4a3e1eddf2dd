// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for engine lifecycle and document routing.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// Engine started running a resolved workflow.
///
/// # Log Level
/// `info!`
pub struct EngineStarted<'a> {
    pub workflow: &'a str,
    pub node_count: usize,
}

impl Display for EngineStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting workflow '{}' with {} nodes",
            self.workflow, self.node_count
        )
    }
}

impl StructuredLog for EngineStarted<'_> {
    fn log(&self) {
        tracing::info!(
            workflow = self.workflow,
            node_count = self.node_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "workflow",
            span_name = name,
            workflow = self.workflow,
            node_count = self.node_count,
        )
    }
}

/// Engine finished; every node reached a terminal state.
///
/// # Log Level
/// `info!` when everything completed, `warn!` otherwise
pub struct EngineCompleted<'a> {
    pub workflow: &'a str,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub duration: Duration,
}

impl Display for EngineCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Workflow '{}' finished in {:?}: {} completed, {} failed, {} timed out",
            self.workflow, self.duration, self.completed, self.failed, self.timed_out
        )
    }
}

impl StructuredLog for EngineCompleted<'_> {
    fn log(&self) {
        if self.failed == 0 && self.timed_out == 0 {
            tracing::info!(
                workflow = self.workflow,
                completed = self.completed,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            );
        } else {
            tracing::warn!(
                workflow = self.workflow,
                completed = self.completed,
                failed = self.failed,
                timed_out = self.timed_out,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            );
        }
    }
}

/// A produced document was queued for a consumer node.
///
/// # Log Level
/// `debug!`
pub struct DocumentRouted<'a> {
    pub document_id: &'a str,
    pub doc_type: &'a str,
    pub from: &'a str,
    pub to: &'a str,
}

impl Display for DocumentRouted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Routed document '{}' ({}) from '{}' to '{}'",
            self.document_id, self.doc_type, self.from, self.to
        )
    }
}

impl StructuredLog for DocumentRouted<'_> {
    fn log(&self) {
        tracing::debug!(
            document_id = self.document_id,
            doc_type = self.doc_type,
            from = self.from,
            to = self.to,
            "{}", self
        );
    }
}

/// A produced document had no consumer and was dropped.
///
/// # Log Level
/// `debug!`
pub struct DocumentUnrouted<'a> {
    pub document_id: &'a str,
    pub doc_type: &'a str,
    pub from: &'a str,
}

impl Display for DocumentUnrouted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Document '{}' ({}) from '{}' has no consumer; dropped",
            self.document_id, self.doc_type, self.from
        )
    }
}

impl StructuredLog for DocumentUnrouted<'_> {
    fn log(&self) {
        tracing::debug!(
            document_id = self.document_id,
            doc_type = self.doc_type,
            from = self.from,
            "{}", self
        );
    }
}

/// Cancellation was requested; root nodes see "no more inputs".
///
/// # Log Level
/// `info!`
pub struct EngineCancelled<'a> {
    pub workflow: &'a str,
}

impl Display for EngineCancelled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Workflow '{}' cancelled; closing root inputs", self.workflow)
    }
}

impl StructuredLog for EngineCancelled<'_> {
    fn log(&self) {
        tracing::info!(workflow = self.workflow, "{}", self);
    }
}
