// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use bytes::Bytes;

use crate::document::Document;
use crate::errors::PublishError;

/// What a sink actually sends for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendering {
    pub routing_key: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// A publish destination: render a document, deliver its bytes.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short kind tag used in logs ("amqp", "file", "http").
    fn kind(&self) -> &'static str;

    fn render(&self, document: &Document) -> Rendering;

    async fn deliver(&self, document: &Document) -> Result<(), PublishError>;

    /// Release connections once the publish step has no more inputs.
    async fn shutdown(&self) {}
}
