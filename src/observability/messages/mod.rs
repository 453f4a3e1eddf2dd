// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! * `engine` - engine lifecycle and document routing
//! * `step` - step discovery and runner state transitions
//! * `workflow` - workflow resolution
//! * `broker` - broker connections, failover and publishing

pub mod broker;
pub mod engine;
pub mod step;
pub mod workflow;

use tracing::Span;

/// A log message that knows its own level and structured fields.
pub trait StructuredLog {
    /// Emit the message at its level.
    fn log(&self);

    /// A span carrying the same fields, for wrapping longer operations.
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("gridpub", span_name = name)
    }
}
