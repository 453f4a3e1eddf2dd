// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::document::Document;
use crate::errors::StepError;
use crate::observability::messages::broker::PublishDropped;
use crate::observability::messages::StructuredLog;
use crate::traits::{LocalStepFn, Sink};

/// Terminal step handing every input document to a [`Sink`].
///
/// A failed delivery drops that one document; the step keeps going.
pub struct PublishStep {
    sink: Arc<dyn Sink>,
}

impl PublishStep {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl LocalStepFn for PublishStep {
    async fn run(
        &self,
        node_id: &str,
        _params: &Map<String, Value>,
        mut inputs: mpsc::Receiver<Document>,
        _outputs: mpsc::Sender<Document>,
    ) -> Result<(), StepError> {
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        while let Some(document) = inputs.recv().await {
            match self.sink.deliver(&document).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    dropped += 1;
                    PublishDropped {
                        sink: self.sink.kind(),
                        document_id: &document.id,
                        error: &error,
                    }
                    .log();
                }
            }
        }
        self.sink.shutdown().await;
        tracing::debug!(node_id, delivered, dropped, "publish step drained");
        Ok(())
    }
}
