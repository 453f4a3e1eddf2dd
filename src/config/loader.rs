// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::consts::{DEFAULT_DESCRIBE_TIMEOUT_SECS, DEFAULT_LIVENESS_POLL_MS};
use crate::config::{PublishConfig, WorkflowConfig};
use crate::contract::StepContract;
use crate::errors::ConfigurationError;

/// Top-level configuration.
///
/// Loaded once from YAML and passed explicitly to whatever needs it; there is
/// no global configuration state.
///
/// # Example
/// ```yaml
/// engine:
///   liveness_poll_ms: 100
///   fail_hard: false
/// steps:
///   - program: /usr/libexec/gridpub/pbs_jobs
/// publish:
///   - name: file_publish
///     requires: [glue2.compute.json]
///     sink: { kind: file, path: /tmp/compute.json }
/// workflow:
///   name: glue2-compute
///   nodes:
///     - step: file_publish
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineOptions,
    #[serde(default)]
    pub steps: Vec<StepProgramConfig>,
    #[serde(default)]
    pub publish: Vec<PublishConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Engine-wide options.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineOptions {
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,
    #[serde(default = "default_describe_timeout_secs")]
    pub describe_timeout_secs: u64,
    /// Exit non-zero when any node fails or times out
    #[serde(default)]
    pub fail_hard: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            liveness_poll_ms: DEFAULT_LIVENESS_POLL_MS,
            describe_timeout_secs: DEFAULT_DESCRIBE_TIMEOUT_SECS,
            fail_hard: false,
        }
    }
}

impl EngineOptions {
    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms.max(1))
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs(self.describe_timeout_secs)
    }
}

fn default_liveness_poll_ms() -> u64 {
    DEFAULT_LIVENESS_POLL_MS
}

fn default_describe_timeout_secs() -> u64 {
    DEFAULT_DESCRIBE_TIMEOUT_SECS
}

/// An external step program to be discovered through self-description.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepProgramConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Config {
    /// Validates publish entries and returns the contracts they define.
    pub fn publish_contracts(&self) -> Result<Vec<StepContract>, ConfigurationError> {
        let mut seen = HashSet::new();
        let mut contracts = Vec::with_capacity(self.publish.len());
        for entry in &self.publish {
            entry.validate()?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigurationError::InvalidPublish {
                    name: entry.name.clone(),
                    reason: "publish entry names must be unique".to_string(),
                });
            }
            contracts.push(
                StepContract::new(entry.name.clone(), entry.time_out)
                    .requires(entry.requires.iter().cloned())
                    .with_description(
                        entry
                            .description
                            .clone()
                            .unwrap_or_else(|| format!("publish to {}", sink_kind(entry))),
                    ),
            );
        }
        Ok(contracts)
    }

    pub fn publish_entry(&self, name: &str) -> Option<&PublishConfig> {
        self.publish.iter().find(|p| p.name == name)
    }
}

fn sink_kind(entry: &PublishConfig) -> &'static str {
    match entry.sink {
        crate::config::SinkConfig::Amqp(_) => "amqp",
        crate::config::SinkConfig::File(_) => "file",
        crate::config::SinkConfig::Http(_) => "http",
    }
}

/// Load a config from a YAML file, validating the publish entries.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigurationError> {
    let path = path.as_ref();
    let load_error = |reason: String| ConfigurationError::Load {
        path: path.display().to_string(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let cfg: Config = serde_yaml::from_str(&content).map_err(|e| load_error(e.to_string()))?;
    cfg.publish_contracts()?;
    Ok(cfg)
}
