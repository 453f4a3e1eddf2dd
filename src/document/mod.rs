// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Documents: the typed units of payload passed between workflow nodes.
//!
//! A [`Document`] is produced by a step's output, routed by its `doc_type` to every
//! node that requires that type, and dropped once delivered. Nothing is persisted.

pub mod codec;

use bytes::Bytes;

pub use codec::{DocumentCodec, FrameHeader, MAX_BODY_LENGTH, MAX_HEADER_LENGTH};

/// A typed, addressable unit of payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Identifier, used as the default routing key when published
    pub id: String,
    /// Type tag used for graph wiring
    pub doc_type: String,
    /// Opaque payload
    pub body: Bytes,
    /// Node that emitted this document, filled in by the engine
    pub source_node_id: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            body: body.into(),
            source_node_id: None,
        }
    }

    /// Returns a copy stamped with the node that produced it.
    pub fn from_node(mut self, node_id: &str) -> Self {
        self.source_node_id = Some(node_id.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
