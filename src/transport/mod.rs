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

//! Envelope transports.
//!
//! A transport carries envelopes across an execution-context boundary:
//! fire-and-forget, at-most-once, FIFO per sender. Inbound payloads pass
//! through the schema validator before reaching the protocol engine;
//! malformed payloads surface as [`TransportEvent::Error`], never as a
//! panic inside dispatch.

pub mod frame;
pub mod framed;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::envelope::Envelope;
use crate::core::errors::TransportError;

/// Events delivered to the protocol engine by a running transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A validated envelope
    Message(Envelope),
    /// Malformed payload or dropped message; the connection stays up
    Error(TransportError),
    /// The transport is gone. Emitted exactly once.
    Closed,
}

/// A bidirectional envelope channel.
///
/// `start` begins listening and yields the inbound event stream; it may be
/// called once. `close` stops listening and causes `Closed` to be signalled
/// exactly once, whether closed locally or by the peer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
