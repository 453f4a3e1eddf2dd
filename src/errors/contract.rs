// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::time::Duration;
use thiserror::Error;

/// A step program failed to describe itself correctly.
///
/// Raised at discovery time, before any workflow is built.
#[derive(Error, Debug)]
pub enum StepContractViolation {
    /// The program could not be started at all.
    #[error("step program '{program}' could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The describe invocation exited with a non-zero status.
    #[error("step program '{program}' exited with {status} while describing itself: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    /// The describe invocation did not finish in time.
    #[error("step program '{program}' did not describe itself within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The self-description is not valid JSON.
    #[error("step program '{program}' emitted a malformed description: {reason}")]
    Malformed { program: String, reason: String },

    /// The self-description lacks a mandatory field.
    #[error("step program '{program}' description is missing '{field}'")]
    MissingField { program: String, field: &'static str },

    /// Two step programs describe themselves with the same name.
    #[error("step name '{name}' is declared by both '{first}' and '{second}'")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
}

/// The set of available steps could not be assembled from configuration.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A publish entry is invalid.
    #[error(transparent)]
    Configuration(#[from] crate::errors::ConfigurationError),

    /// A step program did not honor the self-description contract.
    #[error(transparent)]
    Contract(#[from] StepContractViolation),
}
