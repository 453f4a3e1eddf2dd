// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::{FileMode, FileSinkConfig};
use crate::document::Document;
use crate::errors::PublishError;
use crate::traits::{Rendering, Sink};

/// Writes documents to a local file.
///
/// `overwrite` leaves the last document in the file; `append` keeps every
/// document, one per line.
pub struct FileSink {
    path: PathBuf,
    mode: FileMode,
    // serializes writers so appended records never interleave
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            mode,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &FileSinkConfig) -> Self {
        Self::new(config.path.clone(), config.mode)
    }

    fn error(&self, source: std::io::Error) -> PublishError {
        PublishError::File {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn render(&self, document: &Document) -> Rendering {
        Rendering {
            routing_key: document.id.clone(),
            bytes: Bytes::clone(&document.body),
            content_type: None,
        }
    }

    async fn deliver(&self, document: &Document) -> Result<(), PublishError> {
        let rendering = self.render(document);
        let _guard = self.lock.lock().await;

        let mut options = OpenOptions::new();
        options.create(true);
        match self.mode {
            FileMode::Overwrite => options.write(true).truncate(true),
            FileMode::Append => options.append(true),
        };
        let mut file = options.open(&self.path).await.map_err(|e| self.error(e))?;

        file.write_all(&rendering.bytes).await.map_err(|e| self.error(e))?;
        if self.mode == FileMode::Append && !rendering.bytes.ends_with(b"\n") {
            file.write_all(b"\n").await.map_err(|e| self.error(e))?;
        }
        file.flush().await.map_err(|e| self.error(e))
    }
}
