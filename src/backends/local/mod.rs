// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process steps.
//!
//! [`LocalStep`] runs a [`LocalStepFn`] on its own task and connects it to the
//! runner through bounded channels, so in-process and external steps look the
//! same from the engine's side.

pub mod publish;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::contract::StepContract;
use crate::document::Document;
use crate::errors::StepError;
use crate::traits::{DocumentReader, DocumentWriter, LocalStepFn, Step, StepControl, StepExecution};

pub use publish::PublishStep;

const CHANNEL_CAPACITY: usize = 64;

pub struct LocalStep {
    contract: StepContract,
    body: Arc<dyn LocalStepFn>,
}

impl LocalStep {
    pub fn new(contract: StepContract, body: Arc<dyn LocalStepFn>) -> Self {
        Self { contract, body }
    }
}

#[async_trait]
impl Step for LocalStep {
    fn contract(&self) -> &StepContract {
        &self.contract
    }

    async fn start(&self, node_id: &str, params: &Map<String, Value>) -> Result<StepExecution, StepError> {
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let body = Arc::clone(&self.body);
        let node_id = node_id.to_string();
        let params = params.clone();
        let handle = tokio::spawn(async move { body.run(&node_id, &params, input_rx, output_tx).await });

        Ok(StepExecution {
            writer: Box::new(ChannelWriter {
                sender: Some(input_tx),
            }),
            reader: Box::new(ChannelReader { receiver: output_rx }),
            control: Box::new(TaskControl {
                handle: Some(handle),
                outcome: None,
            }),
        })
    }
}

struct ChannelWriter {
    sender: Option<mpsc::Sender<Document>>,
}

#[async_trait]
impl DocumentWriter for ChannelWriter {
    async fn write(&mut self, document: Document) -> Result<(), StepError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StepError::Io("input already closed".to_string()))?;
        sender
            .send(document)
            .await
            .map_err(|_| StepError::Io("step stopped accepting input".to_string()))
    }

    async fn close(&mut self) -> Result<(), StepError> {
        self.sender = None;
        Ok(())
    }
}

struct ChannelReader {
    receiver: mpsc::Receiver<Document>,
}

#[async_trait]
impl DocumentReader for ChannelReader {
    async fn next(&mut self) -> Option<Result<Document, StepError>> {
        self.receiver.recv().await.map(Ok)
    }
}

struct TaskControl {
    handle: Option<JoinHandle<Result<(), StepError>>>,
    outcome: Option<Result<(), StepError>>,
}

#[async_trait]
impl StepControl for TaskControl {
    async fn try_wait(&mut self) -> Option<Result<(), StepError>> {
        if self.outcome.is_none() {
            let finished = self.handle.as_ref().map_or(false, |h| h.is_finished());
            if finished {
                if let Some(handle) = self.handle.take() {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join_error) => Err(StepError::Runtime(join_error.to_string())),
                    };
                    self.outcome = Some(result);
                }
            }
        }
        self.outcome.clone()
    }

    async fn kill(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    async fn diagnostics(&mut self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::{FailingStep, UppercaseStep};
    use std::time::Duration;

    async fn wait_exit(control: &mut Box<dyn StepControl>) -> Result<(), StepError> {
        loop {
            if let Some(result) = control.try_wait().await {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_local_step_streams_documents() {
        let step = LocalStep::new(
            StepContract::new("upper", 1).requires(["text"]).produces(["text.upper"]),
            Arc::new(UppercaseStep),
        );
        let mut exec = step.start("n1", &Map::new()).await.unwrap();
        exec.writer.write(Document::new("a", "text", "abc")).await.unwrap();
        exec.writer.close().await.unwrap();

        let doc = exec.reader.next().await.unwrap().unwrap();
        assert_eq!(doc.doc_type, "text.upper");
        assert_eq!(&doc.body[..], b"ABC");
        assert!(exec.reader.next().await.is_none());
        assert!(wait_exit(&mut exec.control).await.is_ok());
    }

    #[tokio::test]
    async fn test_local_step_error_is_reported() {
        let step = LocalStep::new(StepContract::new("fail", 1), Arc::new(FailingStep));
        let mut exec = step.start("n1", &Map::new()).await.unwrap();
        exec.writer.close().await.unwrap();

        assert_eq!(
            wait_exit(&mut exec.control).await,
            Err(StepError::Runtime("simulated step failure".to_string()))
        );
    }
}
