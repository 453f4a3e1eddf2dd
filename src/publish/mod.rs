// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Publish destinations.
//!
//! Every destination implements [`crate::traits::Sink`]; the publish step only
//! sees the trait. [`sink_from_config`] turns a `sink:` config block into one.

pub mod amqp;
pub mod file;
pub mod http;

use std::sync::Arc;

use crate::config::SinkConfig;
use crate::errors::PublishError;
use crate::traits::Sink;

pub use amqp::AmqpSink;
pub use file::FileSink;
pub use http::HttpSink;

/// Build the sink a publish entry describes.
pub fn sink_from_config(config: &SinkConfig) -> Result<Arc<dyn Sink>, PublishError> {
    let sink: Arc<dyn Sink> = match config {
        SinkConfig::Amqp(amqp) => Arc::new(AmqpSink::from_config(amqp)),
        SinkConfig::File(file) => Arc::new(FileSink::from_config(file)),
        SinkConfig::Http(http) => Arc::new(HttpSink::from_config(http)?),
    };
    Ok(sink)
}
