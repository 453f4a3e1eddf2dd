// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Step contracts: the static description of what a step needs and produces.
//!
//! Contracts come from two places. External step programs describe themselves
//! when run with [`DESCRIBE_ARG`] (see [`discovery`]), and the built-in publish
//! steps build theirs from configuration. Both end up in a [`ContractRegistry`],
//! which the workflow resolver consults.

pub mod discovery;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub use discovery::{describe_program, parse_description, DESCRIBE_ARG};
pub use registry::ContractRegistry;

/// Static description of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContract {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Drain budget in seconds, measured from the moment the step's input closes
    pub time_out: u64,
    #[serde(rename = "requires")]
    pub required_types: BTreeSet<String>,
    #[serde(rename = "produces")]
    pub produced_types: BTreeSet<String>,
    #[serde(rename = "params", default)]
    pub accepted_params: BTreeMap<String, String>,
}

impl StepContract {
    pub fn new(name: impl Into<String>, time_out: u64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            time_out,
            required_types: BTreeSet::new(),
            produced_types: BTreeSet::new(),
            accepted_params: BTreeMap::new(),
        }
    }

    pub fn requires<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn produces<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produced_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.accepted_params.insert(name.into(), description.into());
        self
    }

    pub fn drain_budget(&self) -> Duration {
        Duration::from_secs(self.time_out)
    }

    /// A step with no required types is fed directly from the engine's input.
    pub fn is_root(&self) -> bool {
        self.required_types.is_empty()
    }
}
