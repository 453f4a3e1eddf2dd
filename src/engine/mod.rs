// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Workflow execution.
//!
//! The [`Engine`] starts one [`StepRunner`] per node of a resolved workflow and
//! connects them through per-node queues. Runners never fail each other: a
//! node that fails or times out just tells its consumers it is done, and
//! independent parts of the graph run to completion.

#[allow(clippy::module_inception)]
pub mod engine;
pub mod queue;
pub mod router;
pub mod runner;
#[cfg(test)]
mod integration_tests;

pub use engine::{Engine, EngineReport};
pub use queue::{NodeEvent, NodeInbox, ENGINE_INPUT};
pub use router::Router;
pub use runner::{NodeOutcome, NodeReport, RunnerState, StepRunner};
