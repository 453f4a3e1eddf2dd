// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Step implementations.
//!
//! # Available Backends
//!
//! ## Process Backend
//! External step programs speaking the framed document protocol over
//! stdin/stdout, discovered through `--describe`.
//!
//! ## Local Backend
//! In-process steps behind the same [`crate::traits::Step`] interface. The
//! built-in publish step lives here.
//!
//! ## Stub Backend (Test-Only)
//! Scripts and in-process doubles for runner and engine tests. Not available
//! in production builds.
//!
//! # Architecture
//!
//! ```text
//! Configuration → StepCatalog → Arc<dyn Step> → StepRunner
//! ```

pub mod factory;
pub mod local;
pub mod process;
#[cfg(test)]
pub mod stub;

pub use factory::StepCatalog;
