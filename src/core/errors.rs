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

//! Error taxonomy for the bridge.
//!
//! Local errors (bad registration, malformed inbound payloads) are recovered
//! or logged and never tear down the connection. Handshake and sandbox
//! failures are fatal. Per-request errors are scoped to that request's
//! future and never affect other in-flight requests.

use thiserror::Error;

use crate::core::envelope::JsonRpcError;

/// Classification failure for a value received off the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Not a JSON object, or missing the jsonrpc marker
    #[error("not a JSON-RPC envelope: {0}")]
    NotAnEnvelope(String),

    /// Wrong jsonrpc marker value
    #[error("unsupported jsonrpc marker '{0}'")]
    BadMarker(String),

    /// Known method with params that do not match its declared shape
    #[error("malformed params for method '{method}': {detail}")]
    MalformedParams { method: String, detail: String },

    /// Response carrying neither result nor error, or both
    #[error("malformed response for id {id}: {detail}")]
    MalformedResponse { id: String, detail: String },

    /// Request id of an unsupported JSON type
    #[error("invalid request id: {0}")]
    InvalidId(String),
}

/// Transport-level failures. Reported through the transport's error event,
/// never thrown into the dispatch loop.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] EnvelopeError),

    #[error("message from unexpected source origin '{0}' dropped")]
    UnexpectedSource(String),

    #[error("transport closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Programmer errors signalled synchronously at handler registration time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("method '{method}' is not covered by the negotiated capabilities")]
    CapabilityNotSupported { method: String },

    #[error("a handler is already registered for method '{0}'")]
    AlreadyRegistered(String),
}

/// Failure of a single outbound request. Scoped to that request's future.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed result payload: {0}")]
    MalformedResult(String),
}

/// Fatal handshake failures. The guest closes its own transport and the
/// `connect` future rejects; there is no retry inside this layer.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("endpoint is not in a connectable state ({0})")]
    InvalidState(&'static str),

    #[error("initialize request failed: {0}")]
    Initialize(#[from] RequestError),

    #[error("host response missing required field '{0}'")]
    MissingField(&'static str),

    #[error("host-declared protocol version '{0}' is unusable")]
    UnusableVersion(String),
}

/// Sandbox proxy initialization failures. Configuration bugs, not
/// recoverable runtime conditions; all abort initialization entirely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("proxy is not embedded in a parent frame")]
    NotEmbedded,

    #[error("embedding referrer is absent")]
    MissingReferrer,

    #[error("embedding referrer '{0}' is not on the allow-list")]
    ReferrerDenied(String),

    #[error("isolation self-test reached the top-level window; refusing to run")]
    IsolationBroken,
}
