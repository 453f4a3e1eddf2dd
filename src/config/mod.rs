// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod loader;
mod publish;
mod workflow;

pub mod consts;

pub use loader::{load_config, Config, EngineOptions, StepProgramConfig};
pub use publish::{
    AmqpSinkConfig, ConnectionPolicy, CredentialConfig, EndpointConfig, FileMode,
    FileSinkConfig, HttpMethod, HttpSinkConfig, PublishConfig, SinkConfig,
};
pub use workflow::{WorkflowConfig, WorkflowNodeSpec};
