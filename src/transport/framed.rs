// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-stream transport with Content-Length framing.
//!
//! Lets host and guest run in separate processes over stdio-like streams.
//! Uses LSP-style `Content-Length` headers for robust message framing.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace};

use crate::core::constants::limits;
use crate::core::envelope::{classify, Envelope};
use crate::core::errors::TransportError;
use crate::transport::{Transport, TransportEvent};

// State machine for LSP-style headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body(usize),
}

pub struct EnvelopeCodec {
    state: DecodeState,
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Value;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        trace!("Decoder attempting to read from {} bytes buffer", src.len());
        loop {
            match self.state {
                DecodeState::Head => {
                    let mut i = 0;
                    let mut found_header = false;

                    // Robust header parsing: scan for \r\n\r\n or \n\n
                    while i < src.len() {
                        if src[i] == b'\n' {
                            if i >= 1 && src[i - 1] == b'\n' {
                                found_header = true;
                                i += 1;
                                break;
                            }
                            if i >= 3
                                && src[i - 1] == b'\r'
                                && src[i - 2] == b'\n'
                                && src[i - 3] == b'\r'
                            {
                                found_header = true;
                                i += 1;
                                break;
                            }
                        }
                        i += 1;
                    }

                    if found_header {
                        let header_bytes = src.split_to(i);
                        let header_str = std::str::from_utf8(&header_bytes)
                            .context("Invalid UTF-8 in headers")?;

                        let mut len = 0;
                        for line in header_str.lines() {
                            let lower = line.to_lowercase();
                            if lower.starts_with("content-length:") {
                                if let Some(val_str) = line.split(':').nth(1) {
                                    len = val_str
                                        .trim()
                                        .parse::<usize>()
                                        .context("Invalid content-length value")?;
                                    debug!("Found Content-Length: {}", len);
                                }
                            }
                        }

                        if len == 0 {
                            return Err(anyhow!("Missing or invalid Content-Length header"));
                        }

                        if len as u64 > limits::MAX_MESSAGE_SIZE_BYTES {
                            return Err(anyhow!("Message length {} exceeds max limit", len));
                        }

                        self.state = DecodeState::Body(len);
                    } else {
                        if src.len() > 4096 {
                            return Err(anyhow!("Header too large"));
                        }
                        return Ok(None);
                    }
                }
                DecodeState::Body(len) => {
                    if src.len() >= len {
                        let body = src.split_to(len);
                        self.state = DecodeState::Head;
                        let val: Value = serde_json::from_slice(&body)?;
                        trace!("Decoded message: {:?}", val);
                        return Ok(Some(val));
                    } else {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl<'a> Encoder<&'a Envelope> for EnvelopeCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: &'a Envelope, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(item)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&body);
        Ok(())
    }
}

/// Transport over any duplex byte stream.
pub struct FramedTransport<T: AsyncRead + AsyncWrite + Send + 'static> {
    reader: Mutex<Option<FramedRead<ReadHalf<T>, EnvelopeCodec>>>,
    writer: Mutex<FramedWrite<WriteHalf<T>, EnvelopeCodec>>,
    shutdown: CancellationToken,
}

impl<T: AsyncRead + AsyncWrite + Send + 'static> FramedTransport<T> {
    pub fn new(stream: T) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(FramedRead::new(read_half, EnvelopeCodec::new()))),
            writer: Mutex::new(FramedWrite::new(write_half, EnvelopeCodec::new())),
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Send + 'static> Transport for FramedTransport<T> {
    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut framed = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(TransportError::Closed)?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    item = framed.next() => match item {
                        Some(i) => i,
                        None => break, // EOF
                    },
                };

                match item {
                    Ok(value) => match classify(value) {
                        Ok(envelope) => {
                            if event_tx.send(TransportEvent::Message(envelope)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "dropping malformed payload");
                            let _ = event_tx
                                .send(TransportEvent::Error(TransportError::MalformedPayload(e)))
                                .await;
                        }
                    },
                    Err(e) => {
                        // Framing errors desynchronize the stream; give up
                        let _ = event_tx
                            .send(TransportEvent::Error(TransportError::SendFailed(
                                e.to_string(),
                            )))
                            .await;
                        break;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok(event_rx)
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer
            .send(&envelope)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::RequestId;
    use serde_json::json;

    #[test]
    fn decode_single_message() {
        let mut codec = EnvelopeCodec::new();
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let mut buf = BytesMut::from(
            format!("Content-Length: {}\r\n\r\n{}", body.len(), body).as_bytes(),
        );
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value["method"], "ping");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_body() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"Content-Length: 10\r\n\r\n{\"a\""[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_missing_length() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"X-Whatever: 3\r\n\r\nabc"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut codec = EnvelopeCodec::new();
        let huge = limits::MAX_MESSAGE_SIZE_BYTES + 1;
        let mut buf = BytesMut::from(format!("Content-Length: {huge}\r\n\r\n").as_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_then_decode() {
        let mut codec = EnvelopeCodec::new();
        let env = Envelope::request(RequestId::new(9), "tools/call", Some(json!({"name": "x"})));
        let mut buf = BytesMut::new();
        codec.encode(&env, &mut buf).unwrap();
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["method"], "tools/call");
    }

    #[tokio::test]
    async fn duplex_round_trip() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let left = FramedTransport::new(a);
        let right = FramedTransport::new(b);
        let _left_events = left.start().await.unwrap();
        let mut right_events = right.start().await.unwrap();

        left.send(Envelope::notification(
            "ui/notifications/initialized",
            None,
        ))
        .await
        .unwrap();

        match right_events.recv().await.unwrap() {
            TransportEvent::Message(Envelope::Notification(n)) => {
                assert_eq!(n.method, "ui/notifications/initialized");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
