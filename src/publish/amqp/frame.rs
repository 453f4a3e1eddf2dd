// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! AMQP 0-9-1 wire codec.
//!
//! Only the slice of the protocol a publisher needs: connection negotiation,
//! one channel in confirm mode, `basic.publish` with its content header and
//! body frames, the broker's acks and nacks, and the close handshakes. Field tables sent by the broker are skipped, not
//! interpreted.
//!
//! ```text
//! +------+---------+---------+-------------+-----------+
//! | type | channel |  size   |   payload   | frame-end |
//! |  u8  |   u16   |   u32   | size octets |   0xCE    |
//! +------+---------+---------+-------------+-----------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::TransportError;

/// Sent by the client before anything else.
pub const PROTOCOL_HEADER: &[u8; 8] = b"AMQP\x00\x00\x09\x01";
pub const FRAME_END: u8 = 0xCE;
/// Frame type, channel, size and frame-end.
pub const FRAME_OVERHEAD: usize = 8;
/// Largest frame this client negotiates or accepts.
pub const DEFAULT_FRAME_MAX: u32 = 131_072;
/// Longest AMQP short string (exchange names, routing keys).
pub const SHORT_STR_MAX: usize = 255;

const FRAME_METHOD: u8 = 1;
const FRAME_HEADER: u8 = 2;
const FRAME_BODY: u8 = 3;
const FRAME_HEARTBEAT: u8 = 8;

const CLASS_CONNECTION: u16 = 10;
const CLASS_CHANNEL: u16 = 20;
pub const CLASS_BASIC: u16 = 60;
const CLASS_CONFIRM: u16 = 85;

const FLAG_CONTENT_TYPE: u16 = 0x8000;
const FLAG_DELIVERY_MODE: u16 = 0x1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Method {
        channel: u16,
        method: Method,
    },
    Header {
        channel: u16,
        class_id: u16,
        body_size: u64,
        properties: BasicProperties,
    },
    Body {
        channel: u16,
        payload: Bytes,
    },
    Heartbeat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    /// 2 means persistent
    pub delivery_mode: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    ConnectionStart {
        version_major: u8,
        version_minor: u8,
        mechanisms: String,
        locales: String,
    },
    ConnectionStartOk {
        mechanism: String,
        response: Bytes,
        locale: String,
    },
    ConnectionTune {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionTuneOk {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionOpen {
        vhost: String,
    },
    ConnectionOpenOk,
    ConnectionClose(CloseReason),
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose(CloseReason),
    ChannelCloseOk,
    BasicPublish {
        exchange: String,
        routing_key: String,
        mandatory: bool,
        immediate: bool,
    },
    BasicAck {
        delivery_tag: u64,
        multiple: bool,
    },
    BasicNack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
    ConfirmSelect,
    ConfirmSelectOk,
}

impl Method {
    pub fn ids(&self) -> (u16, u16) {
        match self {
            Method::ConnectionStart { .. } => (CLASS_CONNECTION, 10),
            Method::ConnectionStartOk { .. } => (CLASS_CONNECTION, 11),
            Method::ConnectionTune { .. } => (CLASS_CONNECTION, 30),
            Method::ConnectionTuneOk { .. } => (CLASS_CONNECTION, 31),
            Method::ConnectionOpen { .. } => (CLASS_CONNECTION, 40),
            Method::ConnectionOpenOk => (CLASS_CONNECTION, 41),
            Method::ConnectionClose(_) => (CLASS_CONNECTION, 50),
            Method::ConnectionCloseOk => (CLASS_CONNECTION, 51),
            Method::ChannelOpen => (CLASS_CHANNEL, 10),
            Method::ChannelOpenOk => (CLASS_CHANNEL, 11),
            Method::ChannelClose(_) => (CLASS_CHANNEL, 40),
            Method::ChannelCloseOk => (CLASS_CHANNEL, 41),
            Method::BasicPublish { .. } => (CLASS_BASIC, 40),
            Method::BasicAck { .. } => (CLASS_BASIC, 80),
            Method::BasicNack { .. } => (CLASS_BASIC, 120),
            Method::ConfirmSelect => (CLASS_CONFIRM, 10),
            Method::ConfirmSelectOk => (CLASS_CONFIRM, 11),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::ConnectionStart { .. } => "connection.start",
            Method::ConnectionStartOk { .. } => "connection.start-ok",
            Method::ConnectionTune { .. } => "connection.tune",
            Method::ConnectionTuneOk { .. } => "connection.tune-ok",
            Method::ConnectionOpen { .. } => "connection.open",
            Method::ConnectionOpenOk => "connection.open-ok",
            Method::ConnectionClose(_) => "connection.close",
            Method::ConnectionCloseOk => "connection.close-ok",
            Method::ChannelOpen => "channel.open",
            Method::ChannelOpenOk => "channel.open-ok",
            Method::ChannelClose(_) => "channel.close",
            Method::ChannelCloseOk => "channel.close-ok",
            Method::BasicPublish { .. } => "basic.publish",
            Method::BasicAck { .. } => "basic.ack",
            Method::BasicNack { .. } => "basic.nack",
            Method::ConfirmSelect => "confirm.select",
            Method::ConfirmSelectOk => "confirm.select-ok",
        }
    }
}

/// Reply carried by `connection.close` and `channel.close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl CloseReason {
    /// A normal, client-initiated close.
    pub fn normal() -> Self {
        Self {
            reply_code: 200,
            reply_text: "goodbye".to_string(),
            class_id: 0,
            method_id: 0,
        }
    }
}

/// The frames making up one `basic.publish`: method, content header and the
/// body split so that no frame exceeds `frame_max`.
pub fn publish_frames(
    channel: u16,
    exchange: &str,
    routing_key: &str,
    properties: BasicProperties,
    body: Bytes,
    frame_max: u32,
) -> Vec<Frame> {
    let mut frames = vec![
        Frame::Method {
            channel,
            method: Method::BasicPublish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                mandatory: false,
                immediate: false,
            },
        },
        Frame::Header {
            channel,
            class_id: CLASS_BASIC,
            body_size: body.len() as u64,
            properties,
        },
    ];

    let chunk = match frame_max as usize {
        0 => body.len().max(1),
        max => max.saturating_sub(FRAME_OVERHEAD).max(1),
    };
    let mut rest = body;
    while !rest.is_empty() {
        let payload = rest.split_to(chunk.min(rest.len()));
        frames.push(Frame::Body { channel, payload });
    }
    frames
}

/// SASL PLAIN response: `\0user\0pass`.
pub fn plain_response(user: &str, pass: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(user.len() + pass.len() + 2);
    buf.put_u8(0);
    buf.put_slice(user.as_bytes());
    buf.put_u8(0);
    buf.put_slice(pass.as_bytes());
    buf.freeze()
}

/// Frame codec for one connection. Frames above [`DEFAULT_FRAME_MAX`] are
/// rejected, which is never less than what the client negotiates.
#[derive(Debug, Default)]
pub struct AmqpCodec;

impl AmqpCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for AmqpCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if src.len() >= 4 && &src[..4] == b"AMQP" {
            return Err(TransportError::Protocol(
                "broker rejected the protocol version".to_string(),
            ));
        }
        if src.len() < 7 {
            return Ok(None);
        }

        let size = u32::from_be_bytes([src[3], src[4], src[5], src[6]]);
        if size > DEFAULT_FRAME_MAX {
            return Err(TransportError::Protocol(format!(
                "frame of {} bytes exceeds frame max {}",
                size, DEFAULT_FRAME_MAX
            )));
        }
        let total = 7 + size as usize + 1;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let frame_type = frame.get_u8();
        let channel = frame.get_u16();
        frame.advance(4);
        if frame[size as usize] != FRAME_END {
            return Err(TransportError::Protocol("missing frame-end octet".to_string()));
        }
        frame.truncate(size as usize);
        let payload = frame.freeze();

        let decoded = match frame_type {
            FRAME_METHOD => Frame::Method {
                channel,
                method: decode_method(payload)?,
            },
            FRAME_HEADER => decode_header(channel, payload)?,
            FRAME_BODY => Frame::Body { channel, payload },
            FRAME_HEARTBEAT => Frame::Heartbeat,
            other => {
                return Err(TransportError::Protocol(format!("unknown frame type {}", other)))
            }
        };
        Ok(Some(decoded))
    }
}

impl Encoder<Frame> for AmqpCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        let mut payload = BytesMut::new();
        let (frame_type, channel) = match frame {
            Frame::Method { channel, method } => {
                encode_method(&method, &mut payload)?;
                (FRAME_METHOD, channel)
            }
            Frame::Header {
                channel,
                class_id,
                body_size,
                properties,
            } => {
                payload.put_u16(class_id);
                payload.put_u16(0);
                payload.put_u64(body_size);
                encode_properties(&properties, &mut payload)?;
                (FRAME_HEADER, channel)
            }
            Frame::Body { channel, payload: body } => {
                payload.put_slice(&body);
                (FRAME_BODY, channel)
            }
            Frame::Heartbeat => (FRAME_HEARTBEAT, 0),
        };

        dst.reserve(payload.len() + FRAME_OVERHEAD);
        dst.put_u8(frame_type);
        dst.put_u16(channel);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        dst.put_u8(FRAME_END);
        Ok(())
    }
}

fn encode_method(method: &Method, buf: &mut BytesMut) -> Result<(), TransportError> {
    let (class_id, method_id) = method.ids();
    buf.put_u16(class_id);
    buf.put_u16(method_id);
    match method {
        Method::ConnectionStart {
            version_major,
            version_minor,
            mechanisms,
            locales,
        } => {
            buf.put_u8(*version_major);
            buf.put_u8(*version_minor);
            buf.put_u32(0);
            put_long_str(buf, mechanisms.as_bytes());
            put_long_str(buf, locales.as_bytes());
        }
        Method::ConnectionStartOk {
            mechanism,
            response,
            locale,
        } => {
            put_client_properties(buf)?;
            put_short_str(buf, mechanism)?;
            put_long_str(buf, response);
            put_short_str(buf, locale)?;
        }
        Method::ConnectionTune {
            channel_max,
            frame_max,
            heartbeat,
        }
        | Method::ConnectionTuneOk {
            channel_max,
            frame_max,
            heartbeat,
        } => {
            buf.put_u16(*channel_max);
            buf.put_u32(*frame_max);
            buf.put_u16(*heartbeat);
        }
        Method::ConnectionOpen { vhost } => {
            put_short_str(buf, vhost)?;
            put_short_str(buf, "")?;
            buf.put_u8(0);
        }
        Method::ConnectionOpenOk => put_short_str(buf, "")?,
        Method::ConnectionClose(reason) | Method::ChannelClose(reason) => {
            buf.put_u16(reason.reply_code);
            put_short_str(buf, &reason.reply_text)?;
            buf.put_u16(reason.class_id);
            buf.put_u16(reason.method_id);
        }
        Method::ConnectionCloseOk | Method::ChannelCloseOk => {}
        Method::ChannelOpen => put_short_str(buf, "")?,
        Method::ChannelOpenOk => put_long_str(buf, b""),
        Method::BasicPublish {
            exchange,
            routing_key,
            mandatory,
            immediate,
        } => {
            buf.put_u16(0);
            put_short_str(buf, exchange)?;
            put_short_str(buf, routing_key)?;
            buf.put_u8(u8::from(*mandatory) | (u8::from(*immediate) << 1));
        }
        Method::BasicAck {
            delivery_tag,
            multiple,
        } => {
            buf.put_u64(*delivery_tag);
            buf.put_u8(u8::from(*multiple));
        }
        Method::BasicNack {
            delivery_tag,
            multiple,
            requeue,
        } => {
            buf.put_u64(*delivery_tag);
            buf.put_u8(u8::from(*multiple) | (u8::from(*requeue) << 1));
        }
        // nowait is always off; the client waits for select-ok.
        Method::ConfirmSelect => buf.put_u8(0),
        Method::ConfirmSelectOk => {}
    }
    Ok(())
}

fn decode_method(mut payload: Bytes) -> Result<Method, TransportError> {
    need(&payload, 4)?;
    let class_id = payload.get_u16();
    let method_id = payload.get_u16();
    let buf = &mut payload;

    let method = match (class_id, method_id) {
        (CLASS_CONNECTION, 10) => {
            need(buf, 2)?;
            let version_major = buf.get_u8();
            let version_minor = buf.get_u8();
            skip_table(buf)?;
            Method::ConnectionStart {
                version_major,
                version_minor,
                mechanisms: string(get_long_str(buf)?)?,
                locales: string(get_long_str(buf)?)?,
            }
        }
        (CLASS_CONNECTION, 11) => {
            skip_table(buf)?;
            Method::ConnectionStartOk {
                mechanism: get_short_str(buf)?,
                response: get_long_str(buf)?,
                locale: get_short_str(buf)?,
            }
        }
        (CLASS_CONNECTION, 30) | (CLASS_CONNECTION, 31) => {
            need(buf, 8)?;
            let channel_max = buf.get_u16();
            let frame_max = buf.get_u32();
            let heartbeat = buf.get_u16();
            if method_id == 30 {
                Method::ConnectionTune {
                    channel_max,
                    frame_max,
                    heartbeat,
                }
            } else {
                Method::ConnectionTuneOk {
                    channel_max,
                    frame_max,
                    heartbeat,
                }
            }
        }
        (CLASS_CONNECTION, 40) => Method::ConnectionOpen {
            vhost: get_short_str(buf)?,
        },
        (CLASS_CONNECTION, 41) => Method::ConnectionOpenOk,
        (CLASS_CONNECTION, 50) => Method::ConnectionClose(get_close_reason(buf)?),
        (CLASS_CONNECTION, 51) => Method::ConnectionCloseOk,
        (CLASS_CHANNEL, 10) => Method::ChannelOpen,
        (CLASS_CHANNEL, 11) => Method::ChannelOpenOk,
        (CLASS_CHANNEL, 40) => Method::ChannelClose(get_close_reason(buf)?),
        (CLASS_CHANNEL, 41) => Method::ChannelCloseOk,
        (CLASS_BASIC, 40) => {
            need(buf, 2)?;
            buf.advance(2);
            let exchange = get_short_str(buf)?;
            let routing_key = get_short_str(buf)?;
            need(buf, 1)?;
            let bits = buf.get_u8();
            Method::BasicPublish {
                exchange,
                routing_key,
                mandatory: bits & 1 != 0,
                immediate: bits & 2 != 0,
            }
        }
        (CLASS_BASIC, 80) => {
            need(buf, 9)?;
            let delivery_tag = buf.get_u64();
            let bits = buf.get_u8();
            Method::BasicAck {
                delivery_tag,
                multiple: bits & 1 != 0,
            }
        }
        (CLASS_BASIC, 120) => {
            need(buf, 9)?;
            let delivery_tag = buf.get_u64();
            let bits = buf.get_u8();
            Method::BasicNack {
                delivery_tag,
                multiple: bits & 1 != 0,
                requeue: bits & 2 != 0,
            }
        }
        (CLASS_CONFIRM, 10) => Method::ConfirmSelect,
        (CLASS_CONFIRM, 11) => Method::ConfirmSelectOk,
        (class, method) => {
            return Err(TransportError::Protocol(format!(
                "unsupported method {}.{}",
                class, method
            )))
        }
    };
    Ok(method)
}

fn decode_header(channel: u16, mut payload: Bytes) -> Result<Frame, TransportError> {
    need(&payload, 14)?;
    let class_id = payload.get_u16();
    payload.advance(2);
    let body_size = payload.get_u64();
    let flags = payload.get_u16();

    let mut properties = BasicProperties::default();
    if flags & FLAG_CONTENT_TYPE != 0 {
        properties.content_type = Some(get_short_str(&mut payload)?);
    }
    // content-encoding and headers sit between the two properties we know.
    if flags & 0x6000 != 0 {
        return Err(TransportError::Protocol(
            "unsupported content header properties".to_string(),
        ));
    }
    if flags & FLAG_DELIVERY_MODE != 0 {
        need(&payload, 1)?;
        properties.delivery_mode = Some(payload.get_u8());
    }
    Ok(Frame::Header {
        channel,
        class_id,
        body_size,
        properties,
    })
}

fn encode_properties(properties: &BasicProperties, buf: &mut BytesMut) -> Result<(), TransportError> {
    let mut flags = 0u16;
    if properties.content_type.is_some() {
        flags |= FLAG_CONTENT_TYPE;
    }
    if properties.delivery_mode.is_some() {
        flags |= FLAG_DELIVERY_MODE;
    }
    buf.put_u16(flags);
    if let Some(content_type) = &properties.content_type {
        put_short_str(buf, content_type)?;
    }
    if let Some(mode) = properties.delivery_mode {
        buf.put_u8(mode);
    }
    Ok(())
}

fn put_client_properties(buf: &mut BytesMut) -> Result<(), TransportError> {
    let mut table = BytesMut::new();
    for (key, value) in [
        ("product", env!("CARGO_PKG_NAME")),
        ("version", env!("CARGO_PKG_VERSION")),
    ] {
        put_short_str(&mut table, key)?;
        table.put_u8(b'S');
        put_long_str(&mut table, value.as_bytes());
    }
    put_long_str(buf, &table);
    Ok(())
}

fn put_short_str(buf: &mut BytesMut, value: &str) -> Result<(), TransportError> {
    let len = u8::try_from(value.len())
        .map_err(|_| TransportError::Protocol(format!("short string too long: {} bytes", value.len())))?;
    buf.put_u8(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_long_str(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn need(buf: &Bytes, n: usize) -> Result<(), TransportError> {
    if buf.remaining() < n {
        return Err(TransportError::Protocol("truncated method frame".to_string()));
    }
    Ok(())
}

fn get_short_str(buf: &mut Bytes) -> Result<String, TransportError> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len)?;
    string(buf.split_to(len))
}

fn get_long_str(buf: &mut Bytes) -> Result<Bytes, TransportError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn skip_table(buf: &mut Bytes) -> Result<(), TransportError> {
    get_long_str(buf).map(|_| ())
}

fn get_close_reason(buf: &mut Bytes) -> Result<CloseReason, TransportError> {
    need(buf, 2)?;
    let reply_code = buf.get_u16();
    let reply_text = get_short_str(buf)?;
    need(buf, 4)?;
    Ok(CloseReason {
        reply_code,
        reply_text,
        class_id: buf.get_u16(),
        method_id: buf.get_u16(),
    })
}

fn string(bytes: Bytes) -> Result<String, TransportError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TransportError::Protocol("string field is not UTF-8".to_string()))
}
