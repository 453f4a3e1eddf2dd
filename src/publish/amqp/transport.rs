// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Single-connection socket transport.
//!
//! One event-loop task owns the socket (plain TCP or TLS). It multiplexes:
//!
//! - **read readiness**: bytes are appended to the inbound buffer and fed to
//!   the frame parser; a zero-length read is a peer shutdown and ends the loop
//!   with [`TransportEvent::Disconnected`]
//! - **write readiness**: only armed while output is pending; a partial write
//!   advances the *same* pending buffer and the remainder is retried on the
//!   next readiness, so nothing is re-sliced or lost under TLS
//! - **timers**: [`AsyncSocketTransport::schedule`] arms a one-shot timer that
//!   comes back as [`TransportEvent::Timer`]
//! - **commands** from the owning client
//!
//! Would-block never surfaces as an error: the tokio reactor simply parks the
//! corresponding branch until the socket is ready again.

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::time::DelayQueue;

use crate::errors::TransportError;
use crate::observability::messages::broker::ConnectAttemptFailed;
use crate::observability::messages::StructuredLog;
use crate::publish::amqp::frame::{AmqpCodec, Frame};
use crate::publish::amqp::{tls, AmqpSettings, BrokerEndpoint};

const READ_CHUNK: usize = 8 * 1024;
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(1);

trait Socket: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Socket for T {}

/// Something the event loop observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Frame),
    Timer(u64),
    Disconnected(String),
}

enum Command {
    Send {
        bytes: Bytes,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Schedule {
        after: Duration,
        token: u64,
    },
    Shutdown,
}

pub struct AsyncSocketTransport {
    endpoint: BrokerEndpoint,
    codec: AmqpCodec,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    task: JoinHandle<()>,
}

impl AsyncSocketTransport {
    /// Connect with the configured number of attempts, then negotiate TLS if
    /// the endpoint asks for it.
    pub async fn connect(
        endpoint: &BrokerEndpoint,
        settings: &AmqpSettings,
    ) -> Result<Self, TransportError> {
        let tcp = connect_with_retry(endpoint, settings.connect_attempts, settings.connect_delay).await?;
        tcp.set_nodelay(true)?;

        let socket: Box<dyn Socket> = if endpoint.tls {
            let (connector, server_name) = tls::connector(endpoint, settings)?;
            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| TransportError::Tls {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
            Box::new(stream)
        } else {
            Box::new(tcp)
        };

        Ok(Self::spawn(endpoint.clone(), socket))
    }

    fn spawn(endpoint: BrokerEndpoint, socket: Box<dyn Socket>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(event_loop(socket, command_rx, event_tx));
        Self {
            endpoint,
            codec: AmqpCodec::new(),
            commands: command_tx,
            events: event_rx,
            task,
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Queue raw bytes and wait until they have been handed to the socket.
    pub async fn send_raw(&self, bytes: Bytes) -> Result<(), TransportError> {
        let (done, flushed) = oneshot::channel();
        self.commands
            .send(Command::Send { bytes, done })
            .map_err(|_| stopped())?;
        flushed.await.map_err(|_| stopped())?
    }

    /// Encode `frames` into one write and send them.
    pub async fn send(&mut self, frames: Vec<Frame>) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        for frame in frames {
            self.codec.encode(frame, &mut buf)?;
        }
        self.send_raw(buf.freeze()).await
    }

    /// Arm a one-shot timer reported back as `TransportEvent::Timer(token)`.
    pub fn schedule(&self, after: Duration, token: u64) -> Result<(), TransportError> {
        self.commands
            .send(Command::Schedule { after, token })
            .map_err(|_| stopped())
    }

    /// Wait for the next event. A stopped loop reads as disconnected.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Disconnected("transport stopped".to_string()))
    }

    /// An event that has already arrived, if any.
    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Some(TransportEvent::Disconnected("transport stopped".to_string()))
            }
        }
    }

    /// Flush what is pending, close the socket and stop the loop.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if tokio::time::timeout(SHUTDOWN_LIMIT, &mut self.task).await.is_err() {
            self.task.abort();
        }
    }
}

impl Drop for AsyncSocketTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn stopped() -> TransportError {
    TransportError::Disconnected("transport stopped".to_string())
}

async fn connect_with_retry(
    endpoint: &BrokerEndpoint,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream, TransportError> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                ConnectAttemptFailed {
                    endpoint: &endpoint.to_string(),
                    attempt,
                    max_attempts: attempts,
                    error: &error,
                }
                .log();
                last_error = error.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(TransportError::Connect {
        endpoint: endpoint.to_string(),
        attempts,
        reason: last_error,
    })
}

/// Completion of a queued write: fires once `end` bytes have been flushed.
struct WriteWaiter {
    end: u64,
    done: oneshot::Sender<Result<(), TransportError>>,
}

async fn event_loop(
    socket: Box<dyn Socket>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut reader, mut writer) = tokio::io::split(socket);
    let mut codec = AmqpCodec::new();
    let mut inbound = BytesMut::with_capacity(READ_CHUNK);
    let mut pending = BytesMut::new();
    let mut queued: u64 = 0;
    let mut flushed: u64 = 0;
    let mut waiters: VecDeque<WriteWaiter> = VecDeque::new();
    let mut timers: DelayQueue<u64> = DelayQueue::new();

    let reason = loop {
        tokio::select! {
            read = reader.read_buf(&mut inbound) => match read {
                Ok(0) => break "peer closed the connection".to_string(),
                Ok(_) => {
                    if let Err(error) = parse_frames(&mut codec, &mut inbound, &events) {
                        break error.to_string();
                    }
                }
                Err(error) => break error.to_string(),
            },
            written = writer.write(&pending), if !pending.is_empty() => match written {
                Ok(0) => break "socket accepted no bytes".to_string(),
                Ok(n) => {
                    pending.advance(n);
                    flushed += n as u64;
                    if pending.is_empty() {
                        if let Err(error) = writer.flush().await {
                            break error.to_string();
                        }
                    }
                    while waiters.front().map_or(false, |w| w.end <= flushed) {
                        if let Some(waiter) = waiters.pop_front() {
                            let _ = waiter.done.send(Ok(()));
                        }
                    }
                }
                Err(error) => break error.to_string(),
            },
            Some(expired) = timers.next(), if !timers.is_empty() => {
                let _ = events.send(TransportEvent::Timer(expired.into_inner()));
            }
            command = commands.recv() => match command {
                Some(Command::Send { bytes, done }) => {
                    queued += bytes.len() as u64;
                    pending.extend_from_slice(&bytes);
                    waiters.push_back(WriteWaiter { end: queued, done });
                }
                Some(Command::Schedule { after, token }) => {
                    timers.insert(token, after);
                }
                Some(Command::Shutdown) | None => {
                    if !pending.is_empty() {
                        let _ = writer.write_all(&pending).await;
                    }
                    let _ = writer.shutdown().await;
                    for waiter in waiters.drain(..) {
                        let _ = waiter.done.send(Ok(()));
                    }
                    return;
                }
            },
        }
    };

    for waiter in waiters.drain(..) {
        let _ = waiter
            .done
            .send(Err(TransportError::Disconnected(reason.clone())));
    }
    let _ = events.send(TransportEvent::Disconnected(reason));
}

fn parse_frames(
    codec: &mut AmqpCodec,
    inbound: &mut BytesMut,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), TransportError> {
    while let Some(frame) = codec.decode(inbound)? {
        let _ = events.send(TransportEvent::Frame(frame));
    }
    if inbound.capacity() - inbound.len() < READ_CHUNK {
        inbound.reserve(READ_CHUNK);
    }
    Ok(())
}
