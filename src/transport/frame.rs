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

//! Cross-frame message ports and the frame transport.
//!
//! [`MessagePort`] models the browser's cross-window messaging primitive:
//! every posted message is stamped with the sender's origin, delivery is
//! FIFO per sender, and the receiver sees the origin but cannot forge it.
//! [`FrameTransport`] runs the protocol over such a port, optionally
//! filtering by expected source origin before validation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::envelope::{classify, Envelope};
use crate::core::errors::TransportError;
use crate::transport::{Transport, TransportEvent};

/// A raw cross-frame message: an arbitrary JSON value stamped with the
/// origin of the window that posted it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub origin: String,
    pub payload: Value,
}

/// One end of a cross-frame message channel.
pub struct MessagePort {
    origin: String,
    tx: mpsc::Sender<FrameMessage>,
    rx: Mutex<Option<mpsc::Receiver<FrameMessage>>>,
}

impl MessagePort {
    /// Create a linked pair of ports. Messages posted on one end arrive at
    /// the other, stamped with the posting end's origin.
    pub fn pair(origin_a: impl Into<String>, origin_b: impl Into<String>) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::channel(256);
        let (tx_ba, rx_ba) = mpsc::channel(256);
        (
            Self {
                origin: origin_a.into(),
                tx: tx_ab,
                rx: Mutex::new(Some(rx_ba)),
            },
            Self {
                origin: origin_b.into(),
                tx: tx_ba,
                rx: Mutex::new(Some(rx_ab)),
            },
        )
    }

    /// The origin this port stamps on outgoing messages.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Post a raw value to the peer window. Fire-and-forget: a gone peer is
    /// reported as a send failure, nothing else.
    pub async fn post(&self, payload: Value) -> Result<(), TransportError> {
        self.tx
            .send(FrameMessage {
                origin: self.origin.clone(),
                payload,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Take the inbound half. Yields `None` after the first call.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<FrameMessage>> {
        self.rx.lock().await.take()
    }
}

impl std::fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePort")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Protocol transport over a [`MessagePort`].
pub struct FrameTransport {
    port: Arc<MessagePort>,
    /// If set, inbound messages from any other origin are dropped and logged
    expected_origin: Option<String>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl FrameTransport {
    pub fn new(port: MessagePort) -> Self {
        Self {
            port: Arc::new(port),
            expected_origin: None,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Only accept inbound messages stamped with `origin`. First line of
    /// defense against cross-context spoofing.
    pub fn with_expected_origin(mut self, origin: impl Into<String>) -> Self {
        self.expected_origin = Some(origin.into());
        self
    }
}

#[async_trait]
impl Transport for FrameTransport {
    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::SendFailed("transport already started".into()));
        }
        let mut port_rx = self
            .port
            .take_receiver()
            .await
            .ok_or(TransportError::Closed)?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let expected = self.expected_origin.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    msg = port_rx.recv() => match msg {
                        Some(m) => m,
                        None => break,
                    },
                };

                if let Some(expected) = &expected {
                    if msg.origin != *expected {
                        warn!(
                            origin = %msg.origin,
                            "dropping message from unexpected source"
                        );
                        let _ = event_tx
                            .send(TransportEvent::Error(TransportError::UnexpectedSource(
                                msg.origin,
                            )))
                            .await;
                        continue;
                    }
                }

                match classify(msg.payload) {
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
                }
            }
            // Single exit point keeps the close-once contract
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok(event_rx)
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.port.post(envelope.to_value()).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_valid_envelopes() {
        let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let transport = FrameTransport::new(guest_port);
        let mut events = transport.start().await.unwrap();

        host_port
            .post(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Message(Envelope::Request(r)) => assert_eq!(r.method, "ping"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn filters_unexpected_origin() {
        let (spoofer, guest_port) = MessagePort::pair("https://evil.example", "null");
        let transport =
            FrameTransport::new(guest_port).with_expected_origin("https://host.example");
        let mut events = transport.start().await.unwrap();

        spoofer
            .post(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Error(TransportError::UnexpectedSource(origin)) => {
                assert_eq!(origin, "https://evil.example");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_error_not_message() {
        let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let transport = FrameTransport::new(guest_port);
        let mut events = transport.start().await.unwrap();

        host_port.post(json!("not an envelope")).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Error(TransportError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn close_signals_exactly_once() {
        let (_host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let transport = FrameTransport::new(guest_port);
        let mut events = transport.start().await.unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Closed));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (_host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let transport = FrameTransport::new(guest_port);
        let _events = transport.start().await.unwrap();
        transport.close().await.unwrap();

        let env = Envelope::notification("ui/notifications/initialized", None);
        assert!(matches!(
            transport.send(env).await,
            Err(TransportError::Closed)
        ));
    }
}
