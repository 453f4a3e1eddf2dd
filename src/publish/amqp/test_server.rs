// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process broker speaking just enough AMQP to exercise the client, over
//! plain TCP or TLS. TLS fixtures under `testdata/` are signed by `ca.pem`.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{self, RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

use crate::publish::amqp::frame::{AmqpCodec, CloseReason, Frame, Method, PROTOCOL_HEADER};
use crate::publish::amqp::BrokerEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Accept,
    /// Answer the login with connection.close 403
    RejectLogin,
    /// Answer every publish with channel.close 404
    ClosePublishChannel,
    /// Answer every publish with basic.nack
    NackPublish,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// How a client authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Login {
    pub mechanism: String,
    pub client_certificate: bool,
}

#[derive(Default)]
struct Recorded {
    connections: usize,
    logins: Vec<Login>,
    published: Vec<PublishedMessage>,
}

pub(crate) struct FakeBroker {
    port: u16,
    tls: bool,
    recorded: Arc<Mutex<Recorded>>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start(behavior: Behavior) -> Self {
        Self::listen(behavior, None).await
    }

    /// TLS listener presenting `broker.pem`; with `require_client_cert` the
    /// peer must present a certificate signed by the test CA.
    pub async fn start_tls(behavior: Behavior, require_client_cert: bool) -> Self {
        Self::listen(behavior, Some(acceptor(require_client_cert))).await
    }

    async fn listen(behavior: Behavior, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let tls = acceptor.is_some();

        let shared = Arc::clone(&recorded);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&shared);
                match acceptor.clone() {
                    Some(acceptor) => {
                        tokio::spawn(async move {
                            if let Ok(stream) = acceptor.accept(stream).await {
                                let client_certificate = stream.get_ref().1.peer_certificates().is_some();
                                let _ = serve(stream, behavior, shared, client_certificate).await;
                            }
                        });
                    }
                    None => {
                        tokio::spawn(serve(stream, behavior, shared, false));
                    }
                }
            }
        });

        Self {
            port,
            tls,
            recorded,
            task,
        }
    }

    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint::new("127.0.0.1", self.port, self.tls)
    }

    pub fn logins(&self) -> Vec<Login> {
        self.recorded.lock().unwrap().logins.clone()
    }

    /// Connections that completed the handshake.
    pub fn connections(&self) -> usize {
        self.recorded.lock().unwrap().connections
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.recorded.lock().unwrap().published.clone()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An endpoint nothing listens on.
pub(crate) fn refused_endpoint() -> BrokerEndpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    BrokerEndpoint::new("127.0.0.1", port, false)
}

/// Path of a TLS fixture, for settings that name files.
pub(crate) fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("src/publish/amqp/testdata")
        .join(name)
}

fn acceptor(require_client_cert: bool) -> TlsAcceptor {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let certs = rustls_pemfile::certs(&mut &include_bytes!("testdata/broker.pem")[..])
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut &include_bytes!("testdata/broker.key")[..])
        .unwrap()
        .unwrap();

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = if require_client_cert {
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &include_bytes!("testdata/ca.pem")[..]) {
            roots.add(cert.unwrap()).unwrap();
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .unwrap();
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };
    TlsAcceptor::from(Arc::new(builder.with_single_cert(certs, key).unwrap()))
}

type Connection<S> = Framed<S, AmqpCodec>;

async fn send<S>(conn: &mut Connection<S>, channel: u16, method: Method) -> Option<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send(Frame::Method { channel, method }).await.ok()
}

async fn recv<S>(conn: &mut Connection<S>) -> Option<Frame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.next().await?.ok()
}

async fn recv_method<S>(conn: &mut Connection<S>) -> Option<Method>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match recv(conn).await? {
        Frame::Method { method, .. } => Some(method),
        _ => None,
    }
}

async fn serve<S>(
    mut stream: S,
    behavior: Behavior,
    recorded: Arc<Mutex<Recorded>>,
    client_certificate: bool,
) -> Option<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await.ok()?;
    if &header != PROTOCOL_HEADER {
        return None;
    }
    let mut conn = Framed::new(stream, AmqpCodec::new());

    send(
        &mut conn,
        0,
        Method::ConnectionStart {
            version_major: 0,
            version_minor: 9,
            mechanisms: "PLAIN EXTERNAL".to_string(),
            locales: "en_US".to_string(),
        },
    )
    .await?;
    let Method::ConnectionStartOk { mechanism, .. } = recv_method(&mut conn).await? else {
        return None;
    };
    recorded.lock().unwrap().logins.push(Login {
        mechanism,
        client_certificate,
    });

    if behavior == Behavior::RejectLogin {
        let reason = CloseReason {
            reply_code: 403,
            reply_text: "ACCESS_REFUSED - Login was refused".to_string(),
            class_id: 10,
            method_id: 11,
        };
        send(&mut conn, 0, Method::ConnectionClose(reason)).await?;
        let _ = recv(&mut conn).await;
        return Some(());
    }

    send(
        &mut conn,
        0,
        Method::ConnectionTune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat: 60,
        },
    )
    .await?;
    let Method::ConnectionTuneOk { .. } = recv_method(&mut conn).await? else {
        return None;
    };
    let Method::ConnectionOpen { .. } = recv_method(&mut conn).await? else {
        return None;
    };
    send(&mut conn, 0, Method::ConnectionOpenOk).await?;
    let Method::ChannelOpen = recv_method(&mut conn).await? else {
        return None;
    };
    send(&mut conn, 1, Method::ChannelOpenOk).await?;
    recorded.lock().unwrap().connections += 1;

    let mut confirms = false;
    let mut delivery_tag = 0u64;
    loop {
        match recv(&mut conn).await? {
            Frame::Method {
                channel,
                method:
                    Method::BasicPublish {
                        exchange,
                        routing_key,
                        ..
                    },
            } => {
                let Frame::Header {
                    body_size,
                    properties,
                    ..
                } = recv(&mut conn).await?
                else {
                    return None;
                };
                let mut body = BytesMut::new();
                while (body.len() as u64) < body_size {
                    match recv(&mut conn).await? {
                        Frame::Body { payload, .. } => body.extend_from_slice(&payload),
                        _ => return None,
                    }
                }

                delivery_tag += 1;
                match behavior {
                    Behavior::ClosePublishChannel => {
                        let reason = CloseReason {
                            reply_code: 404,
                            reply_text: format!("NOT_FOUND - no exchange '{}'", exchange),
                            class_id: 60,
                            method_id: 40,
                        };
                        send(&mut conn, channel, Method::ChannelClose(reason)).await?;
                    }
                    Behavior::NackPublish if confirms => {
                        let nack = Method::BasicNack {
                            delivery_tag,
                            multiple: false,
                            requeue: false,
                        };
                        send(&mut conn, channel, nack).await?;
                    }
                    _ => {
                        recorded.lock().unwrap().published.push(PublishedMessage {
                            exchange,
                            routing_key,
                            content_type: properties.content_type,
                            body: body.freeze(),
                        });
                        if confirms {
                            let ack = Method::BasicAck {
                                delivery_tag,
                                multiple: false,
                            };
                            send(&mut conn, channel, ack).await?;
                        }
                    }
                }
            }
            Frame::Method {
                channel,
                method: Method::ConfirmSelect,
            } => {
                confirms = true;
                send(&mut conn, channel, Method::ConfirmSelectOk).await?;
            }
            Frame::Method {
                method: Method::ConnectionClose(_),
                ..
            } => {
                send(&mut conn, 0, Method::ConnectionCloseOk).await?;
                return Some(());
            }
            Frame::Method {
                channel,
                method: Method::ChannelClose(_),
            } => send(&mut conn, channel, Method::ChannelCloseOk).await?,
            _ => {}
        }
    }
}
