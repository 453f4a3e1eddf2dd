// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod sink;
pub mod step;

pub use sink::{Rendering, Sink};
pub use step::{DocumentReader, DocumentWriter, LocalStepFn, Step, StepControl, StepExecution};
