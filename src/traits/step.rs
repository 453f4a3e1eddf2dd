// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The step abstraction the engine runs.
//!
//! A [`Step`] is either an external program speaking the framed document
//! protocol on stdin/stdout, or an in-process [`LocalStepFn`]. Starting either
//! yields the same [`StepExecution`] triple, so the runner never needs to know
//! which kind it is supervising.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::contract::StepContract;
use crate::document::Document;
use crate::errors::StepError;

#[async_trait]
pub trait Step: Send + Sync {
    fn contract(&self) -> &StepContract;

    /// Start one execution for `node_id` with the node's parameters.
    async fn start(&self, node_id: &str, params: &Map<String, Value>) -> Result<StepExecution, StepError>;
}

/// A started step: its input, its output and a handle to supervise it.
pub struct StepExecution {
    pub writer: Box<dyn DocumentWriter>,
    pub reader: Box<dyn DocumentReader>,
    pub control: Box<dyn StepControl>,
}

/// Input side of a running step.
#[async_trait]
pub trait DocumentWriter: Send {
    async fn write(&mut self, document: Document) -> Result<(), StepError>;

    /// Signal "no more inputs".
    async fn close(&mut self) -> Result<(), StepError>;
}

/// Output side of a running step. `None` means no more outputs.
#[async_trait]
pub trait DocumentReader: Send {
    async fn next(&mut self) -> Option<Result<Document, StepError>>;
}

/// Liveness and termination of a running step.
#[async_trait]
pub trait StepControl: Send {
    /// Non-blocking exit check: `None` while still running.
    async fn try_wait(&mut self) -> Option<Result<(), StepError>>;

    /// Forcibly terminate and reclaim the step.
    async fn kill(&mut self);

    /// Diagnostic text collected so far (stderr for processes).
    async fn diagnostics(&mut self) -> Option<String>;
}

/// An in-process step body.
///
/// `inputs` yields documents until the upstream closes; documents sent to
/// `outputs` are routed like any process output.
#[async_trait]
pub trait LocalStepFn: Send + Sync {
    async fn run(
        &self,
        node_id: &str,
        params: &Map<String, Value>,
        inputs: mpsc::Receiver<Document>,
        outputs: mpsc::Sender<Document>,
    ) -> Result<(), StepError>;
}
