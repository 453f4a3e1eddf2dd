// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod contract;
mod engine;
mod publish;
mod step;

pub use config::ConfigurationError;
pub use contract::{CatalogError, StepContractViolation};
pub use engine::EngineError;
pub use publish::{PublishError, TransportError};
pub use step::StepError;
