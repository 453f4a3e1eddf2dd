// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for broker connections, failover and publishing.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A connect attempt to a broker endpoint failed.
///
/// # Log Level
/// `warn!`
pub struct ConnectAttemptFailed<'a> {
    pub endpoint: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'a dyn std::error::Error,
}

impl Display for ConnectAttemptFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connect attempt {}/{} to {} failed: {}",
            self.attempt, self.max_attempts, self.endpoint, self.error
        )
    }
}

impl StructuredLog for ConnectAttemptFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            endpoint = self.endpoint,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            error = %self.error,
            "{}", self
        );
    }
}

/// A broker session was established.
///
/// # Log Level
/// `info!`
pub struct BrokerConnected<'a> {
    pub endpoint: &'a str,
    pub vhost: &'a str,
    pub tls: bool,
}

impl Display for BrokerConnected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connected to broker {} (vhost '{}', tls={})",
            self.endpoint, self.vhost, self.tls
        )
    }
}

impl StructuredLog for BrokerConnected<'_> {
    fn log(&self) {
        tracing::info!(endpoint = self.endpoint, vhost = self.vhost, tls = self.tls, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("broker", span_name = name, endpoint = self.endpoint)
    }
}

/// The client gave up on one endpoint and moved to the next.
///
/// # Log Level
/// `warn!`
pub struct BrokerFailover<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for BrokerFailover<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Failing over from {} to {} after: {}",
            self.from, self.to, self.error
        )
    }
}

impl StructuredLog for BrokerFailover<'_> {
    fn log(&self) {
        tracing::warn!(from = self.from, to = self.to, error = %self.error, "{}", self);
    }
}

/// A document was handed to the broker.
///
/// # Log Level
/// `debug!`
pub struct DocumentPublished<'a> {
    pub document_id: &'a str,
    pub exchange: &'a str,
    pub routing_key: &'a str,
    pub size: usize,
}

impl Display for DocumentPublished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Published '{}' to exchange '{}' with key '{}' ({} bytes)",
            self.document_id, self.exchange, self.routing_key, self.size
        )
    }
}

impl StructuredLog for DocumentPublished<'_> {
    fn log(&self) {
        tracing::debug!(
            document_id = self.document_id,
            exchange = self.exchange,
            routing_key = self.routing_key,
            size = self.size,
            "{}", self
        );
    }
}

/// A document could not be delivered and was dropped.
///
/// # Log Level
/// `error!`
pub struct PublishDropped<'a> {
    pub sink: &'a str,
    pub document_id: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for PublishDropped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Sink '{}' dropped document '{}': {}",
            self.sink, self.document_id, self.error
        )
    }
}

impl StructuredLog for PublishDropped<'_> {
    fn log(&self) {
        tracing::error!(
            sink = self.sink,
            document_id = self.document_id,
            error = %self.error,
            "{}", self
        );
    }
}

/// The broker closed the channel or connection during the close grace window.
///
/// # Log Level
/// `warn!`
pub struct BrokerClosed<'a> {
    pub endpoint: &'a str,
    pub code: u16,
    pub text: &'a str,
}

impl Display for BrokerClosed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Broker {} closed the session: {} {}",
            self.endpoint, self.code, self.text
        )
    }
}

impl StructuredLog for BrokerClosed<'_> {
    fn log(&self) {
        tracing::warn!(endpoint = self.endpoint, code = self.code, text = self.text, "{}", self);
    }
}
