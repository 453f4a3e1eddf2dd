// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! Log text lives in small message structs implementing `Display`, so the
//! strings are not scattered through the engine and broker code. Each struct
//! also implements [`messages::StructuredLog`], which emits the message at its
//! intended level with the interesting values attached as tracing fields.
//!
//! # Usage
//!
//! ```rust
//! use gridpub::observability::messages::StructuredLog;
//! use gridpub::observability::messages::engine::EngineStarted;
//!
//! EngineStarted {
//!     workflow: "glue2-compute",
//!     node_count: 3,
//! }
//! .log();
//! ```

pub mod messages;

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber, honouring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
