// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Publishing to an AMQP 0-9-1 broker.
//!
//! - [`frame`]: the wire codec
//! - [`transport`]: one socket, one event-loop task
//! - [`client`]: endpoint failover, authentication and publish-with-retry
//! - [`sink`]: the [`crate::traits::Sink`] built on the client

pub mod client;
pub mod frame;
pub mod sink;
mod tls;
pub mod transport;
#[cfg(test)]
pub(crate) mod test_server;

use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::consts::{DEFAULT_AMQPS_PORT, DEFAULT_AMQP_PORT};
use crate::config::{AmqpSinkConfig, ConnectionPolicy, CredentialConfig};
use crate::document::Document;
use crate::traits::Rendering;

pub use client::MessageBrokerClient;
pub use sink::AmqpSink;
pub use transport::{AsyncSocketTransport, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCredential {
    Plain { user: String, pass: String },
    X509 { cert: PathBuf, key: PathBuf, ca: PathBuf },
}

impl BrokerCredential {
    pub fn mechanism(&self) -> &'static str {
        match self {
            BrokerCredential::Plain { .. } => "PLAIN",
            BrokerCredential::X509 { .. } => "EXTERNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub vhost: String,
    pub exchange: String,
    /// Fixed routing key; the document id is used when unset
    pub routing_key: Option<String>,
}

/// Everything a broker client needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct AmqpSettings {
    pub endpoints: Vec<BrokerEndpoint>,
    pub credential: BrokerCredential,
    pub target: PublishTarget,
    pub ca_file: Option<PathBuf>,
    pub connect_attempts: u32,
    pub connect_delay: Duration,
    pub close_grace: Duration,
    pub reply_timeout: Duration,
    pub policy: ConnectionPolicy,
    pub randomize_start: bool,
    pub content_type: Option<String>,
}

impl AmqpSettings {
    pub fn from_config(config: &AmqpSinkConfig) -> Self {
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| {
                let default_port = if e.tls { DEFAULT_AMQPS_PORT } else { DEFAULT_AMQP_PORT };
                BrokerEndpoint::new(e.host.clone(), e.port.unwrap_or(default_port), e.tls)
            })
            .collect();
        let credential = match &config.credential {
            CredentialConfig::Plain { user, pass } => BrokerCredential::Plain {
                user: user.clone(),
                pass: pass.clone(),
            },
            CredentialConfig::X509 { cert, key, ca } => BrokerCredential::X509 {
                cert: cert.clone(),
                key: key.clone(),
                ca: ca.clone(),
            },
        };

        Self {
            endpoints,
            credential,
            target: PublishTarget {
                vhost: config.vhost.clone(),
                exchange: config.exchange.clone(),
                routing_key: config.routing_key.clone(),
            },
            ca_file: config.ca_file.clone(),
            connect_attempts: config.connect_attempts.max(1),
            connect_delay: Duration::from_millis(config.connect_delay_ms),
            close_grace: Duration::from_millis(config.close_grace_ms),
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
            policy: config.connection_policy,
            randomize_start: config.randomize_start,
            content_type: config.content_type.clone(),
        }
    }

    /// The bytes and routing key sent for `document`.
    pub fn render(&self, document: &Document) -> Rendering {
        Rendering {
            routing_key: self
                .target
                .routing_key
                .clone()
                .unwrap_or_else(|| document.id.clone()),
            bytes: Bytes::clone(&document.body),
            content_type: self.content_type.clone(),
        }
    }

    /// CA bundle used to verify brokers: the x509 credential's CA, else `ca_file`.
    pub fn trust_anchor(&self) -> Option<&PathBuf> {
        match &self.credential {
            BrokerCredential::X509 { ca, .. } => Some(ca),
            BrokerCredential::Plain { .. } => self.ca_file.as_ref(),
        }
    }
}
