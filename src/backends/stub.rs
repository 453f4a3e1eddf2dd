// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Test doubles for steps and sinks.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::backends::local::LocalStep;
use crate::contract::StepContract;
use crate::document::Document;
use crate::errors::{PublishError, StepError};
use crate::traits::{LocalStepFn, Rendering, Sink, Step};

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn local(contract: StepContract, body: impl LocalStepFn + 'static) -> Arc<dyn Step> {
    Arc::new(LocalStep::new(contract, Arc::new(body)))
}

/// Uppercases each input body and re-tags it as `<type>.upper`.
pub struct UppercaseStep;

#[async_trait]
impl LocalStepFn for UppercaseStep {
    async fn run(
        &self,
        _node_id: &str,
        _params: &Map<String, Value>,
        mut inputs: mpsc::Receiver<Document>,
        outputs: mpsc::Sender<Document>,
    ) -> Result<(), StepError> {
        while let Some(doc) = inputs.recv().await {
            let body = doc.body.to_ascii_uppercase();
            let out = Document::new(doc.id, format!("{}.upper", doc.doc_type), body);
            if outputs.send(out).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Fails immediately.
pub struct FailingStep;

#[async_trait]
impl LocalStepFn for FailingStep {
    async fn run(
        &self,
        _node_id: &str,
        _params: &Map<String, Value>,
        _inputs: mpsc::Receiver<Document>,
        _outputs: mpsc::Sender<Document>,
    ) -> Result<(), StepError> {
        Err(StepError::Runtime("simulated step failure".to_string()))
    }
}

/// Emits a fixed set of documents, then waits for its input to close.
pub struct EmitStep {
    pub documents: Vec<Document>,
}

impl EmitStep {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl LocalStepFn for EmitStep {
    async fn run(
        &self,
        _node_id: &str,
        _params: &Map<String, Value>,
        mut inputs: mpsc::Receiver<Document>,
        outputs: mpsc::Sender<Document>,
    ) -> Result<(), StepError> {
        for doc in &self.documents {
            outputs
                .send(doc.clone())
                .await
                .map_err(|e| StepError::Runtime(e.to_string()))?;
        }
        while inputs.recv().await.is_some() {}
        Ok(())
    }
}

/// Records every input document.
#[derive(Clone, Default)]
pub struct CollectStep {
    seen: Arc<Mutex<Vec<Document>>>,
}

impl CollectStep {
    pub fn seen(&self) -> Vec<Document> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalStepFn for CollectStep {
    async fn run(
        &self,
        _node_id: &str,
        _params: &Map<String, Value>,
        mut inputs: mpsc::Receiver<Document>,
        _outputs: mpsc::Sender<Document>,
    ) -> Result<(), StepError> {
        while let Some(doc) = inputs.recv().await {
            self.seen.lock().unwrap().push(doc);
        }
        Ok(())
    }
}

/// Sink that remembers delivered ids and fails on one chosen id.
#[derive(Default)]
pub struct RecordingSink {
    fail_on: Option<String>,
    delivered: Mutex<Vec<String>>,
    shut_down: AtomicBool,
}

impl RecordingSink {
    pub fn failing_on(id: &str) -> Self {
        Self {
            fail_on: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn render(&self, document: &Document) -> Rendering {
        Rendering {
            routing_key: document.id.clone(),
            bytes: document.body.clone(),
            content_type: None,
        }
    }

    async fn deliver(&self, document: &Document) -> Result<(), PublishError> {
        if self.fail_on.as_deref() == Some(document.id.as_str()) {
            return Err(PublishError::NoEndpoints);
        }
        let rendering = self.render(document);
        self.delivered.lock().unwrap().push(rendering.routing_key);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
