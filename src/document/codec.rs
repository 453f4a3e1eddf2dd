// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Framing used on a step process's standard input and output.
//!
//! Each document is written as one JSON header line followed by exactly
//! `length` body bytes and a terminating newline:
//!
//! ```text
//! {"id":"cluster1","type":"glue2.compute.json","length":5}
//! hello
//! ```
//!
//! Blank lines between frames are skipped so hand-written step scripts can be
//! a little sloppy. End of stream at a frame boundary means "no more documents".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::document::Document;
use crate::errors::StepError;

/// Longest header line accepted before the stream is declared malformed.
pub const MAX_HEADER_LENGTH: usize = 64 * 1024;

/// Largest body a header may announce.
pub const MAX_BODY_LENGTH: usize = 64 * 1024 * 1024;

/// Header line preceding every document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub length: usize,
}

/// Encoder/decoder for the document stream.
#[derive(Debug, Default)]
pub struct DocumentCodec {
    pending: Option<FrameHeader>,
}

impl DocumentCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for DocumentCodec {
    type Item = Document;
    type Error = StepError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Document>, StepError> {
        loop {
            if self.pending.is_none() {
                let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                    if src.len() > MAX_HEADER_LENGTH {
                        return Err(StepError::MalformedFrame(format!(
                            "header exceeds {} bytes",
                            MAX_HEADER_LENGTH
                        )));
                    }
                    return Ok(None);
                };
                let line = src.split_to(newline + 1);
                let line = trim_line(&line);
                if line.is_empty() {
                    continue;
                }
                let header: FrameHeader = serde_json::from_slice(line)
                    .map_err(|e| StepError::MalformedFrame(format!("bad header: {}", e)))?;
                if header.length > MAX_BODY_LENGTH {
                    return Err(StepError::MalformedFrame(format!(
                        "body length {} exceeds {} bytes",
                        header.length, MAX_BODY_LENGTH
                    )));
                }
                self.pending = Some(header);
            }

            let Some(length) = self.pending.as_ref().map(|h| h.length) else {
                return Ok(None);
            };
            let (Some(with_lf), Some(with_crlf)) = (length.checked_add(1), length.checked_add(2))
            else {
                return Err(StepError::MalformedFrame(format!(
                    "body length {} overflows",
                    length
                )));
            };
            if src.len() < with_lf {
                src.reserve(with_lf - src.len());
                return Ok(None);
            }

            let consumed = match src[length] {
                b'\n' => 1,
                b'\r' if src.len() < with_crlf => return Ok(None),
                b'\r' if src[length + 1] == b'\n' => 2,
                _ => {
                    return Err(StepError::MalformedFrame(
                        "body is not terminated by a newline".to_string(),
                    ))
                }
            };
            let body = src.split_to(length).freeze();
            src.advance(consumed);

            let header = self.pending.take().ok_or_else(|| {
                StepError::MalformedFrame("frame body without header".to_string())
            })?;
            return Ok(Some(Document {
                id: header.id,
                doc_type: header.doc_type,
                body,
                source_node_id: None,
            }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Document>, StepError> {
        match self.decode(src)? {
            Some(doc) => Ok(Some(doc)),
            None => {
                let leftover_is_blank = src.iter().all(|b| b.is_ascii_whitespace());
                if self.pending.is_none() && leftover_is_blank {
                    src.clear();
                    Ok(None)
                } else {
                    Err(StepError::MalformedFrame(
                        "stream ended inside a frame".to_string(),
                    ))
                }
            }
        }
    }
}

impl Encoder<Document> for DocumentCodec {
    type Error = StepError;

    fn encode(&mut self, doc: Document, dst: &mut BytesMut) -> Result<(), StepError> {
        encode_frame(&doc.id, &doc.doc_type, &doc.body, dst)
    }
}

fn encode_frame(id: &str, doc_type: &str, body: &Bytes, dst: &mut BytesMut) -> Result<(), StepError> {
    let header = FrameHeader {
        id: id.to_string(),
        doc_type: doc_type.to_string(),
        length: body.len(),
    };
    let header = serde_json::to_vec(&header)
        .map_err(|e| StepError::MalformedFrame(format!("cannot encode header: {}", e)))?;
    dst.reserve(header.len() + body.len() + 2);
    dst.put_slice(&header);
    dst.put_u8(b'\n');
    dst.put_slice(body);
    dst.put_u8(b'\n');
    Ok(())
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    let mut start = 0;
    while start < end && line[start].is_ascii_whitespace() {
        start += 1;
    }
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn test_document_survives_framing() {
        let body = Bytes::from_static(b"line one\nline two\n\x00\xff binary");
        let original = Document::new("cluster1", "glue2.compute.json", body.clone());

        let (client, server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            let mut framed = FramedWrite::new(client, DocumentCodec::new());
            framed.send(original).await.unwrap();
        });

        let mut reader = FramedRead::new(server, DocumentCodec::new());
        let decoded = reader.next().await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(decoded.doc_type, "glue2.compute.json");
        assert_eq!(decoded.id, "cluster1");
        assert_eq!(decoded.body, body);
        assert!(reader.next().await.is_none());
    }

    #[test]
    fn test_partial_input_waits_for_more_bytes() {
        let mut codec = DocumentCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":\"a\",\"type\":\"t\",\"length\":5}\nhel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\n");
        let doc = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&doc.body[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_blank_lines_between_frames_are_skipped() {
        let mut codec = DocumentCodec::new();
        let mut buf = BytesMut::from(
            &b"\n\n{\"id\":\"a\",\"type\":\"t\",\"length\":1}\nx\n\n{\"id\":\"b\",\"type\":\"t\",\"length\":0}\n\n"[..],
        );
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "b");
        assert!(second.body.is_empty());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_malformed_header_is_an_error() {
        let mut codec = DocumentCodec::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StepError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_missing_body_terminator_is_an_error() {
        let mut codec = DocumentCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":\"a\",\"type\":\"t\",\"length\":2}\nabc\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StepError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_oversized_body_length_is_rejected_before_buffering() {
        let mut codec = DocumentCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":\"a\",\"type\":\"t\",\"length\":1099511627776}\nabc"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StepError::MalformedFrame(_))
        ));
        assert!(buf.capacity() < MAX_BODY_LENGTH);
    }

    #[test]
    fn test_max_usize_body_length_is_rejected() {
        let mut codec = DocumentCodec::new();
        let header = format!("{{\"id\":\"a\",\"type\":\"t\",\"length\":{}}}\nabc", usize::MAX);
        let mut buf = BytesMut::from(header.as_bytes());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StepError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_eof_inside_frame_is_an_error() {
        let mut codec = DocumentCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":\"a\",\"type\":\"t\",\"length\":10}\nabc"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.decode_eof(&mut buf).is_err());
    }
}
