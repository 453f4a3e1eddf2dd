// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::config::{HttpMethod, HttpSinkConfig};
use crate::document::Document;
use crate::errors::PublishError;
use crate::traits::{Rendering, Sink};

/// Sends each document as the body of an HTTP request.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    method: HttpMethod,
    content_type: Option<String>,
}

impl HttpSink {
    pub fn new(
        url: impl Into<String>,
        method: HttpMethod,
        timeout: Duration,
        content_type: Option<String>,
    ) -> Result<Self, PublishError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url,
            method,
            content_type,
        })
    }

    pub fn from_config(config: &HttpSinkConfig) -> Result<Self, PublishError> {
        Self::new(
            config.url.clone(),
            config.method,
            Duration::from_secs(config.timeout_secs),
            config.content_type.clone(),
        )
    }

    fn error(&self, reason: impl ToString) -> PublishError {
        PublishError::Http {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn render(&self, document: &Document) -> Rendering {
        Rendering {
            routing_key: document.id.clone(),
            bytes: Bytes::clone(&document.body),
            content_type: self.content_type.clone(),
        }
    }

    async fn deliver(&self, document: &Document) -> Result<(), PublishError> {
        let rendering = self.render(document);
        let request = match self.method {
            HttpMethod::Post => self.client.post(&self.url),
            HttpMethod::Put => self.client.put(&self.url),
        };
        let request = match &rendering.content_type {
            Some(content_type) => request.header(reqwest::header::CONTENT_TYPE, content_type),
            None => request,
        };

        let response = request
            .header("X-Document-Id", &rendering.routing_key)
            .body(rendering.bytes)
            .send()
            .await
            .map_err(|e| self.error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.error(format!("server answered {}", status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Answers one request with `status` and hands back the raw request.
    async fn respond_once(status: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ingest", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // headers, then the body length they announce
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            stream.write_all(reply.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        });

        (url, rx)
    }

    #[tokio::test]
    async fn test_posts_document_body() {
        let (url, request) = respond_once("200 OK").await;
        let sink = HttpSink::new(url, HttpMethod::Post, Duration::from_secs(5), Some("application/json".to_string())).unwrap();

        sink.deliver(&Document::new("cluster-7", "t", "{\"jobs\":3}")).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /ingest"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.to_ascii_lowercase().contains("x-document-id: cluster-7"));
        assert!(request.ends_with("{\"jobs\":3}"));
    }

    #[tokio::test]
    async fn test_error_status_fails_delivery() {
        let (url, _request) = respond_once("503 Service Unavailable").await;
        let sink = HttpSink::new(url, HttpMethod::Put, Duration::from_secs(5), None).unwrap();

        match sink.deliver(&Document::new("a", "t", "{}")).await {
            Err(PublishError::Http { reason, .. }) => assert!(reason.contains("503")),
            other => panic!("expected http error, got {:?}", other),
        }
    }
}
