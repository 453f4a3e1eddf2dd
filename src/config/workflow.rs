// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named workflow: the operator's list of step references.
///
/// # Example
/// ```yaml
/// name: glue2-compute
/// nodes:
///   - step: amqp_publish
///     id: publisher
///   - step: pbs_jobs
///     params:
///       site: example.org
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_workflow_name")]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNodeSpec>,
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

/// One configured node: a step reference, an optional id and its parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowNodeSpec {
    pub step: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl WorkflowNodeSpec {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            id: None,
            params: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}
