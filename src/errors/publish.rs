// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for the publishing side: the socket transport and the sinks built on it.

use thiserror::Error;

/// Low-level failures of a single broker connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Every connect attempt to the endpoint failed.
    #[error("could not connect to {endpoint} after {attempts} attempt(s): {reason}")]
    Connect {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    /// TLS material could not be loaded or the handshake failed.
    #[error("TLS error for {endpoint}: {reason}")]
    Tls { endpoint: String, reason: String },

    /// Socket read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that are not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker refused the login.
    #[error("authentication rejected by broker: {0}")]
    Authentication(String),

    /// The broker closed the channel or connection with an error reply.
    #[error("broker closed the connection: {code} {text}")]
    Closed { code: u16, text: String },

    /// The connection is gone (peer shutdown or event loop stopped).
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The broker nacked a published message.
    #[error("broker rejected message {delivery_tag}")]
    Rejected { delivery_tag: u64 },

    /// A broker reply did not arrive in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Failure to deliver one rendered document.
///
/// Exhausting the retry policy fails only the document being published.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Both the first attempt and the single failover retry failed.
    #[error("publish of document '{document_id}' failed on {first_endpoint} ({first}) and on retry via {second_endpoint} ({second})")]
    RetryExhausted {
        document_id: String,
        first_endpoint: String,
        first: TransportError,
        second_endpoint: String,
        second: TransportError,
    },

    /// The document cannot be expressed as a broker message at all, so no
    /// endpoint is tried.
    #[error("document '{document_id}' cannot be published: {reason}")]
    InvalidMessage { document_id: String, reason: String },

    /// Writing to a file sink failed.
    #[error("file sink '{path}' failed: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// An HTTP sink request failed or returned a non-success status.
    #[error("HTTP sink '{url}' failed: {reason}")]
    Http { url: String, reason: String },

    /// The sink has no endpoints to try.
    #[error("no broker endpoints configured")]
    NoEndpoints,
}
