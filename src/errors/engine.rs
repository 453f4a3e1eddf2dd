// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Workflow-level failures surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// One or more nodes did not complete and `fail_hard` is enabled.
    #[error("{} node(s) failed: {}", .0.len(), .0.join("; "))]
    NodeFailures(Vec<String>),

    /// A runner task panicked or a step could not be found for a node.
    #[error("internal engine error: {message}")]
    Internal { message: String },
}
