// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for workflow resolution.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// The resolver added a node to produce a missing type.
///
/// # Log Level
/// `info!`
pub struct ProducerInferred<'a> {
    pub doc_type: &'a str,
    pub step: &'a str,
}

impl Display for ProducerInferred<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Inferred step '{}' as the producer of '{}'",
            self.step, self.doc_type
        )
    }
}

impl StructuredLog for ProducerInferred<'_> {
    fn log(&self) {
        tracing::info!(doc_type = self.doc_type, step = self.step, "{}", self);
    }
}

/// The workflow graph was resolved.
///
/// # Log Level
/// `info!`
pub struct WorkflowResolved<'a> {
    pub workflow: &'a str,
    pub configured: usize,
    pub inferred: usize,
}

impl Display for WorkflowResolved<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Resolved workflow '{}': {} configured node(s), {} inferred",
            self.workflow, self.configured, self.inferred
        )
    }
}

impl StructuredLog for WorkflowResolved<'_> {
    fn log(&self) {
        tracing::info!(
            workflow = self.workflow,
            configured = self.configured,
            inferred = self.inferred,
            "{}", self
        );
    }
}
