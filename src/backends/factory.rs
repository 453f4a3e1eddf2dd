// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::local::publish::PublishStep;
use crate::backends::local::LocalStep;
use crate::backends::process::ProcessStep;
use crate::config::Config;
use crate::contract::{ContractRegistry, StepContract};
use crate::errors::{CatalogError, ConfigurationError};
use crate::publish::sink_from_config;
use crate::traits::Step;

/// Every step a workflow may use: the contracts for resolution and the
/// implementations the engine starts, both keyed by step name.
pub struct StepCatalog {
    registry: ContractRegistry,
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepCatalog {
    pub fn new() -> Self {
        Self {
            registry: ContractRegistry::new(),
            steps: HashMap::new(),
        }
    }

    /// Discover the configured step programs (concurrently) and build the
    /// publish steps. Any contract violation aborts before a workflow exists.
    pub async fn from_config(config: &Config) -> Result<Self, CatalogError> {
        let timeout = config.engine.describe_timeout();
        let discovered = join_all(
            config
                .steps
                .iter()
                .map(|s| ProcessStep::discover(&s.program, &s.args, timeout)),
        )
        .await;

        let mut catalog = StepCatalog::new();
        for step in discovered {
            let step = step?;
            let origin = step.program().display().to_string();
            catalog.add(Arc::new(step), origin)?;
        }

        for contract in config.publish_contracts()? {
            let entry = config
                .publish_entry(&contract.name)
                .ok_or_else(|| ConfigurationError::InvalidPublish {
                    name: contract.name.clone(),
                    reason: "entry disappeared while building steps".to_string(),
                })?;
            let sink = sink_from_config(&entry.sink).map_err(|e| ConfigurationError::InvalidPublish {
                name: contract.name.clone(),
                reason: e.to_string(),
            })?;
            let origin = format!("publish entry '{}'", contract.name);
            catalog.add(publish_step(contract, sink), origin)?;
        }

        Ok(catalog)
    }

    /// Register one step; names must be unique across programs and publish entries.
    pub fn add(&mut self, step: Arc<dyn Step>, origin: impl Into<String>) -> Result<(), CatalogError> {
        let contract = step.contract().clone();
        let name = contract.name.clone();
        self.registry.register(contract, origin)?;
        self.steps.insert(name, step);
        Ok(())
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn steps(&self) -> &HashMap<String, Arc<dyn Step>> {
        &self.steps
    }
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn publish_step(contract: StepContract, sink: Arc<dyn crate::traits::Sink>) -> Arc<dyn Step> {
    Arc::new(LocalStep::new(contract, Arc::new(PublishStep::new(sink))))
}
