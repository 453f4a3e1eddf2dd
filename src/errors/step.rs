// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::time::Duration;
use thiserror::Error;

/// Node-local failures of a running step.
///
/// These never abort the whole workflow; they mark a single node
/// `Failed` or `TimedOut`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// The step could not be started.
    #[error("failed to start step: {0}")]
    Spawn(String),

    /// The step exited with a non-zero status.
    #[error("step exited with {status}")]
    NonZeroExit { status: String },

    /// The step emitted a frame the document codec could not decode.
    #[error("malformed output frame: {0}")]
    MalformedFrame(String),

    /// An in-process step returned an error.
    #[error("step failed: {0}")]
    Runtime(String),

    /// The step did not finish within its drain budget.
    #[error("step did not finish within {0:?} after its input closed")]
    Timeout(Duration),

    /// I/O with the step failed.
    #[error("step I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        StepError::Io(err.to_string())
    }
}
