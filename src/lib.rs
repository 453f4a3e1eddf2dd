// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;      // step implementations
pub mod config;        // YAML configuration
pub mod contract;      // step contracts and discovery
pub mod document;      // documents and the IPC codec
pub mod engine;        // workflow execution
pub mod errors;        // error handling
pub mod observability;
pub mod publish;       // sinks and the broker transport
pub mod traits;        // step and sink abstractions
pub mod workflow;      // graph resolution
