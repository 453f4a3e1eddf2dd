// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Publish configuration: each entry becomes a built-in publish step.

use serde::Deserialize;
use std::path::PathBuf;

use crate::config::consts::{
    DEFAULT_CLOSE_GRACE_MS, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY_MS,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PUBLISH_TIME_OUT, DEFAULT_REPLY_TIMEOUT_MS,
};
use crate::errors::ConfigurationError;

/// A publish step definition.
///
/// # Example
/// ```yaml
/// name: amqp_publish
/// requires: [glue2.compute.json]
/// time_out: 30
/// sink:
///   kind: amqp
///   endpoints: [{ host: b1.example.org, tls: true }]
///   exchange: glue2.compute
///   credential:
///     x509: { cert: /etc/grid/cert.pem, key: /etc/grid/key.pem, ca: /etc/grid/ca.pem }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub requires: Vec<String>,
    #[serde(default = "default_publish_time_out")]
    pub time_out: u64,
    pub sink: SinkConfig,
}

fn default_publish_time_out() -> u64 {
    DEFAULT_PUBLISH_TIME_OUT
}

/// Where a publish step delivers its documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Amqp(AmqpSinkConfig),
    File(FileSinkConfig),
    Http(HttpSinkConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmqpSinkConfig {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    pub exchange: String,
    #[serde(default)]
    pub routing_key: Option<String>,
    pub credential: CredentialConfig,
    /// CA bundle used to verify the broker when TLS is on with a plain credential
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default)]
    pub connection_policy: ConnectionPolicy,
    #[serde(default = "default_true")]
    pub randomize_start: bool,
    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_connect_delay_ms() -> u64 {
    DEFAULT_CONNECT_DELAY_MS
}

fn default_close_grace_ms() -> u64 {
    DEFAULT_CLOSE_GRACE_MS
}

fn default_reply_timeout_ms() -> u64 {
    DEFAULT_REPLY_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialConfig {
    Plain { user: String, pass: String },
    X509 { cert: PathBuf, key: PathBuf, ca: PathBuf },
}

/// What the broker client does with its connection between publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Keep the connection open until the publish step finishes
    #[default]
    KeepWarm,
    /// Close (with the grace delay) after every publish
    CloseAfterPublish,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSinkConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: FileMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// Each document replaces the file contents
    #[default]
    Overwrite,
    /// Each document is appended, followed by a newline
    Append,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSinkConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl PublishConfig {
    /// Checks the entry for contradictions the type system cannot catch.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidPublish {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.requires.is_empty() {
            return Err(invalid("'requires' must name at least one document type"));
        }

        match &self.sink {
            SinkConfig::Amqp(amqp) => {
                if amqp.endpoints.is_empty() {
                    return Err(invalid("at least one broker endpoint is required"));
                }
                if amqp.exchange.is_empty() {
                    return Err(invalid("'exchange' must not be empty"));
                }
                if amqp.connect_attempts == 0 {
                    return Err(invalid("'connect_attempts' must be at least 1"));
                }
                let any_tls = amqp.endpoints.iter().any(|e| e.tls);
                match &amqp.credential {
                    CredentialConfig::X509 { .. } => {
                        if amqp.endpoints.iter().any(|e| !e.tls) {
                            return Err(invalid("an x509 credential requires tls on every endpoint"));
                        }
                    }
                    CredentialConfig::Plain { .. } => {
                        if any_tls && amqp.ca_file.is_none() {
                            return Err(invalid("tls endpoints with a plain credential need 'ca_file'"));
                        }
                    }
                }
            }
            SinkConfig::File(file) => {
                if file.path.as_os_str().is_empty() {
                    return Err(invalid("'path' must not be empty"));
                }
            }
            SinkConfig::Http(http) => {
                if !(http.url.starts_with("http://") || http.url.starts_with("https://")) {
                    return Err(invalid("'url' must be an http or https URL"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amqp_entry(yaml_sink: &str) -> PublishConfig {
        let yaml = format!(
            "name: amqp_publish\nrequires: [t1]\nsink:\n{}",
            yaml_sink
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_amqp_defaults() {
        let entry = amqp_entry(
            "  kind: amqp\n  endpoints: [{host: b1}]\n  exchange: glue2\n  credential: {plain: {user: u, pass: p}}\n",
        );
        entry.validate().unwrap();
        let SinkConfig::Amqp(amqp) = entry.sink else {
            panic!("expected amqp sink");
        };
        assert_eq!(amqp.vhost, "/");
        assert_eq!(amqp.connect_attempts, 3);
        assert_eq!(amqp.connection_policy, ConnectionPolicy::KeepWarm);
        assert!(amqp.randomize_start);
        assert_eq!(entry.time_out, DEFAULT_PUBLISH_TIME_OUT);
    }

    #[test]
    fn test_x509_without_tls_is_invalid() {
        let entry = amqp_entry(
            "  kind: amqp\n  endpoints: [{host: b1, tls: false}]\n  exchange: glue2\n  credential: {x509: {cert: c, key: k, ca: a}}\n",
        );
        assert!(matches!(
            entry.validate(),
            Err(ConfigurationError::InvalidPublish { .. })
        ));
    }

    #[test]
    fn test_plain_tls_needs_ca() {
        let entry = amqp_entry(
            "  kind: amqp\n  endpoints: [{host: b1, tls: true}]\n  exchange: glue2\n  credential: {plain: {user: u, pass: p}}\n",
        );
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_close_after_publish_policy_parses() {
        let entry = amqp_entry(
            "  kind: amqp\n  endpoints: [{host: b1}]\n  exchange: e\n  credential: {plain: {user: u, pass: p}}\n  connection_policy: close_after_publish\n",
        );
        let SinkConfig::Amqp(amqp) = entry.sink else {
            panic!("expected amqp sink");
        };
        assert_eq!(amqp.connection_policy, ConnectionPolicy::CloseAfterPublish);
    }

    #[test]
    fn test_http_sink_requires_http_url() {
        let entry: PublishConfig = serde_yaml::from_str(
            "name: h\nrequires: [t1]\nsink: {kind: http, url: 'ftp://x'}\n",
        )
        .unwrap();
        assert!(entry.validate().is_err());
    }
}
