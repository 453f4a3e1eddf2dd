// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Broker client: endpoint selection, login and publish-with-failover.
//!
//! The client keeps a cursor into the endpoint list. The starting endpoint is
//! random so that many publishers spread over a broker cluster. A publish is
//! tried on the current endpoint; on failure the client moves to the next
//! endpoint (wrapping around) and retries exactly once. If the retry fails too,
//! the document is reported as undeliverable and the cursor moves on again so
//! the next document starts somewhere fresh.
//!
//! The publish channel runs in confirm mode. A publish only succeeds once the
//! broker acks it, so a rejection is charged to the document that caused it.
//! A document whose routing key cannot be encoded never reaches a broker.

use bytes::Bytes;
use rand::Rng;
use std::time::Duration;

use crate::config::ConnectionPolicy;
use crate::errors::{PublishError, TransportError};
use crate::observability::messages::broker::{
    BrokerClosed, BrokerConnected, BrokerFailover, DocumentPublished,
};
use crate::observability::messages::StructuredLog;
use crate::publish::amqp::frame::{
    plain_response, publish_frames, BasicProperties, CloseReason, Frame, Method, DEFAULT_FRAME_MAX,
    PROTOCOL_HEADER, SHORT_STR_MAX,
};
use crate::publish::amqp::transport::{AsyncSocketTransport, TransportEvent};
use crate::publish::amqp::{AmqpSettings, BrokerCredential, BrokerEndpoint};
use crate::traits::Rendering;

const PUBLISH_CHANNEL: u16 = 1;
const GRACE_TIMER: u64 = 1;
const PERSISTENT: u8 = 2;

pub struct MessageBrokerClient {
    settings: AmqpSettings,
    current: usize,
    session: Option<Session>,
    failovers: u64,
}

impl MessageBrokerClient {
    pub fn new(settings: AmqpSettings) -> Self {
        let current = if settings.randomize_start && settings.endpoints.len() > 1 {
            rand::thread_rng().gen_range(0..settings.endpoints.len())
        } else {
            0
        };
        Self {
            settings,
            current,
            session: None,
            failovers: 0,
        }
    }

    /// The endpoint the next publish will try first.
    pub fn current_endpoint(&self) -> Option<&BrokerEndpoint> {
        self.settings.endpoints.get(self.current)
    }

    /// How many times the client moved to another endpoint after a failure.
    pub fn failovers(&self) -> u64 {
        self.failovers
    }

    /// Publish one rendered document, failing over once on error.
    pub async fn publish(&mut self, document_id: &str, rendering: &Rendering) -> Result<(), PublishError> {
        let first_endpoint = self
            .current_endpoint()
            .ok_or(PublishError::NoEndpoints)?
            .clone();
        if let Err(reason) = encodable(&self.settings.target.exchange, rendering) {
            return Err(PublishError::InvalidMessage {
                document_id: document_id.to_string(),
                reason,
            });
        }

        let first = match self.attempt(&first_endpoint, rendering).await {
            Ok(()) => {
                self.published(document_id, rendering);
                return Ok(());
            }
            Err(error) => error,
        };

        self.advance();
        let second_endpoint = self
            .current_endpoint()
            .ok_or(PublishError::NoEndpoints)?
            .clone();
        BrokerFailover {
            from: &first_endpoint.to_string(),
            to: &second_endpoint.to_string(),
            error: &first,
        }
        .log();
        self.failovers += 1;

        match self.attempt(&second_endpoint, rendering).await {
            Ok(()) => {
                self.published(document_id, rendering);
                Ok(())
            }
            Err(second) => {
                self.advance();
                Err(PublishError::RetryExhausted {
                    document_id: document_id.to_string(),
                    first_endpoint: first_endpoint.to_string(),
                    first,
                    second_endpoint: second_endpoint.to_string(),
                    second,
                })
            }
        }
    }

    /// Close the warm connection, if there is one, after the grace delay.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            // Nothing is left to fail over; a late close from the broker is only logged.
            let _ = session
                .close_after_grace(self.settings.close_grace, self.settings.reply_timeout)
                .await;
        }
    }

    fn advance(&mut self) {
        if !self.settings.endpoints.is_empty() {
            self.current = (self.current + 1) % self.settings.endpoints.len();
        }
    }

    fn published(&self, document_id: &str, rendering: &Rendering) {
        DocumentPublished {
            document_id,
            exchange: &self.settings.target.exchange,
            routing_key: &rendering.routing_key,
            size: rendering.bytes.len(),
        }
        .log();
    }

    /// One publish on `endpoint`, reusing the warm session when it is still
    /// healthy. Any failure leaves the client without a session.
    async fn attempt(&mut self, endpoint: &BrokerEndpoint, rendering: &Rendering) -> Result<(), TransportError> {
        let mut session = match self.session.take() {
            Some(mut warm) => match warm.check_pending() {
                Ok(()) => warm,
                Err(error) => {
                    warm.abandon().await;
                    return Err(error);
                }
            },
            None => Session::open(endpoint, &self.settings).await?,
        };

        if let Err(error) = session.publish(&self.settings, rendering).await {
            session.abandon().await;
            return Err(error);
        }

        match self.settings.policy {
            ConnectionPolicy::KeepWarm => {
                self.session = Some(session);
                Ok(())
            }
            ConnectionPolicy::CloseAfterPublish => {
                session
                    .close_after_grace(self.settings.close_grace, self.settings.reply_timeout)
                    .await
            }
        }
    }
}

/// One authenticated connection with the publish channel open in confirm mode.
struct Session {
    transport: AsyncSocketTransport,
    frame_max: u32,
    /// Tag of the last message published on the channel.
    delivery_tag: u64,
}

impl Session {
    async fn open(endpoint: &BrokerEndpoint, settings: &AmqpSettings) -> Result<Self, TransportError> {
        let mut transport = AsyncSocketTransport::connect(endpoint, settings).await?;
        match handshake(&mut transport, settings).await {
            Ok(frame_max) => {
                BrokerConnected {
                    endpoint: &endpoint.to_string(),
                    vhost: &settings.target.vhost,
                    tls: endpoint.tls,
                }
                .log();
                Ok(Self {
                    transport,
                    frame_max,
                    delivery_tag: 0,
                })
            }
            Err(error) => {
                transport.shutdown().await;
                Err(error)
            }
        }
    }

    /// Fail if the broker closed the session or dropped it since last use.
    fn check_pending(&mut self) -> Result<(), TransportError> {
        while let Some(event) = self.transport.try_next_event() {
            self.check_event(event)?;
        }
        Ok(())
    }

    fn check_event(&self, event: TransportEvent) -> Result<(), TransportError> {
        match event {
            TransportEvent::Frame(Frame::Method { method, .. }) => match close_reason(&method) {
                Some(reason) => {
                    BrokerClosed {
                        endpoint: &self.transport.endpoint().to_string(),
                        code: reason.reply_code,
                        text: &reason.reply_text,
                    }
                    .log();
                    Err(TransportError::Closed {
                        code: reason.reply_code,
                        text: reason.reply_text.clone(),
                    })
                }
                None => Ok(()),
            },
            TransportEvent::Disconnected(reason) => Err(TransportError::Disconnected(reason)),
            TransportEvent::Frame(_) | TransportEvent::Timer(_) => Ok(()),
        }
    }

    /// Send one message and wait for the broker to ack it.
    async fn publish(&mut self, settings: &AmqpSettings, rendering: &Rendering) -> Result<(), TransportError> {
        let properties = BasicProperties {
            content_type: rendering.content_type.clone(),
            delivery_mode: Some(PERSISTENT),
        };
        let frames = publish_frames(
            PUBLISH_CHANNEL,
            &settings.target.exchange,
            &rendering.routing_key,
            properties,
            Bytes::clone(&rendering.bytes),
            self.frame_max,
        );
        self.transport.send(frames).await?;
        self.delivery_tag += 1;
        self.await_confirm(self.delivery_tag, settings.reply_timeout).await
    }

    async fn await_confirm(&mut self, delivery_tag: u64, timeout: Duration) -> Result<(), TransportError> {
        let covers = |tag: u64, multiple: bool| tag == delivery_tag || (multiple && tag > delivery_tag);
        let confirmed = async {
            loop {
                match self.transport.next_event().await {
                    TransportEvent::Frame(Frame::Method {
                        method: Method::BasicAck { delivery_tag: tag, multiple },
                        ..
                    }) if covers(tag, multiple) => return Ok(()),
                    TransportEvent::Frame(Frame::Method {
                        method: Method::BasicNack { delivery_tag: tag, multiple, .. },
                        ..
                    }) if covers(tag, multiple) => return Err(TransportError::Rejected { delivery_tag }),
                    event => self.check_event(event)?,
                }
            }
        };
        tokio::time::timeout(timeout, confirmed)
            .await
            .map_err(|_| TransportError::Timeout("basic.ack"))?
    }

    /// Wait out the grace window, treating any close from the broker inside it
    /// as a failed publish, then close normally.
    async fn close_after_grace(mut self, grace: Duration, reply_timeout: Duration) -> Result<(), TransportError> {
        if let Err(error) = self.transport.schedule(grace, GRACE_TIMER) {
            self.abandon().await;
            return Err(error);
        }
        loop {
            match self.transport.next_event().await {
                TransportEvent::Timer(GRACE_TIMER) => break,
                event => {
                    if let Err(error) = self.check_event(event) {
                        self.abandon().await;
                        return Err(error);
                    }
                }
            }
        }
        self.close(reply_timeout).await;
        Ok(())
    }

    async fn close(mut self, reply_timeout: Duration) {
        let close = Frame::Method {
            channel: 0,
            method: Method::ConnectionClose(CloseReason::normal()),
        };
        if self.transport.send(vec![close]).await.is_ok() {
            let _ = tokio::time::timeout(reply_timeout, async {
                loop {
                    match self.transport.next_event().await {
                        TransportEvent::Frame(Frame::Method {
                            method: Method::ConnectionCloseOk,
                            ..
                        })
                        | TransportEvent::Disconnected(_) => break,
                        _ => {}
                    }
                }
            })
            .await;
        }
        self.transport.shutdown().await;
    }

    async fn abandon(self) {
        self.transport.shutdown().await;
    }
}

fn close_reason(method: &Method) -> Option<&CloseReason> {
    match method {
        Method::ConnectionClose(reason) | Method::ChannelClose(reason) => Some(reason),
        _ => None,
    }
}

/// Short-string fields of a publish that the broker would never accept.
fn encodable(exchange: &str, rendering: &Rendering) -> Result<(), String> {
    let fields = [
        ("exchange", Some(exchange)),
        ("routing key", Some(rendering.routing_key.as_str())),
        ("content type", rendering.content_type.as_deref()),
    ];
    for (field, value) in fields {
        if let Some(value) = value.filter(|v| v.len() > SHORT_STR_MAX) {
            return Err(format!(
                "{} is {} bytes, longer than the {} byte limit",
                field,
                value.len(),
                SHORT_STR_MAX
            ));
        }
    }
    Ok(())
}

/// Protocol header, login, tuning, vhost, channel and confirm mode. Returns
/// the frame max both sides agreed on.
async fn handshake(transport: &mut AsyncSocketTransport, settings: &AmqpSettings) -> Result<u32, TransportError> {
    let timeout = settings.reply_timeout;
    transport.send_raw(Bytes::from_static(PROTOCOL_HEADER)).await?;

    let mechanism = settings.credential.mechanism();
    match await_method(transport, timeout, "connection.start").await? {
        Method::ConnectionStart { mechanisms, .. } => {
            if !mechanisms.split_whitespace().any(|m| m == mechanism) {
                return Err(TransportError::Authentication(format!(
                    "broker does not offer the {} mechanism (offers: {})",
                    mechanism, mechanisms
                )));
            }
        }
        other => return Err(unexpected("connection.start", &other)),
    }

    let response = match &settings.credential {
        BrokerCredential::Plain { user, pass } => plain_response(user, pass),
        BrokerCredential::X509 { .. } => Bytes::new(),
    };
    transport
        .send(vec![Frame::Method {
            channel: 0,
            method: Method::ConnectionStartOk {
                mechanism: mechanism.to_string(),
                response,
                locale: "en_US".to_string(),
            },
        }])
        .await?;

    let frame_max = match await_method(transport, timeout, "connection.tune").await? {
        Method::ConnectionTune { frame_max, .. } => match frame_max {
            0 => DEFAULT_FRAME_MAX,
            offered => offered.min(DEFAULT_FRAME_MAX),
        },
        other => return Err(unexpected("connection.tune", &other)),
    };

    transport
        .send(vec![
            Frame::Method {
                channel: 0,
                method: Method::ConnectionTuneOk {
                    channel_max: 1,
                    frame_max,
                    heartbeat: 0,
                },
            },
            Frame::Method {
                channel: 0,
                method: Method::ConnectionOpen {
                    vhost: settings.target.vhost.clone(),
                },
            },
        ])
        .await?;
    match await_method(transport, timeout, "connection.open-ok").await? {
        Method::ConnectionOpenOk => {}
        other => return Err(unexpected("connection.open-ok", &other)),
    }

    transport
        .send(vec![Frame::Method {
            channel: PUBLISH_CHANNEL,
            method: Method::ChannelOpen,
        }])
        .await?;
    match await_method(transport, timeout, "channel.open-ok").await? {
        Method::ChannelOpenOk => {}
        other => return Err(unexpected("channel.open-ok", &other)),
    }

    transport
        .send(vec![Frame::Method {
            channel: PUBLISH_CHANNEL,
            method: Method::ConfirmSelect,
        }])
        .await?;
    match await_method(transport, timeout, "confirm.select-ok").await? {
        Method::ConfirmSelectOk => {}
        other => return Err(unexpected("confirm.select-ok", &other)),
    }

    Ok(frame_max)
}

/// Next method frame from the broker. A close reply becomes an error; 403 on
/// the connection means the login was refused.
async fn await_method(
    transport: &mut AsyncSocketTransport,
    timeout: Duration,
    waiting_for: &'static str,
) -> Result<Method, TransportError> {
    let next = async {
        loop {
            match transport.next_event().await {
                TransportEvent::Frame(Frame::Method { method, .. }) => return Ok(method),
                TransportEvent::Frame(Frame::Heartbeat) | TransportEvent::Timer(_) => {}
                TransportEvent::Frame(other) => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected content frame while waiting for {}: {:?}",
                        waiting_for, other
                    )))
                }
                TransportEvent::Disconnected(reason) => return Err(TransportError::Disconnected(reason)),
            }
        }
    };

    let method = tokio::time::timeout(timeout, next)
        .await
        .map_err(|_| TransportError::Timeout(waiting_for))??;

    match method {
        Method::ConnectionClose(reason) if reason.reply_code == 403 => {
            Err(TransportError::Authentication(reason.reply_text))
        }
        Method::ConnectionClose(reason) | Method::ChannelClose(reason) => Err(TransportError::Closed {
            code: reason.reply_code,
            text: reason.reply_text,
        }),
        method => Ok(method),
    }
}

fn unexpected(expected: &str, got: &Method) -> TransportError {
    TransportError::Protocol(format!("expected {}, got {}", expected, got.name()))
}
