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

//! Sandbox proxy: a cross-origin relay frame implementing double-frame
//! isolation.
//!
//! The proxy sits between the host window and a nested, more restrictive
//! frame holding the actual untrusted content. It refuses to initialize
//! unless it is itself embedded by an allow-listed origin, and unless an
//! escape self-test confirms the platform blocks access to the top-level
//! window. The self-test inverts the usual control flow on purpose: the
//! probe MUST fail with a security error, and the absence of that error is
//! the fatal condition, because it is the platform's enforcement being
//! tested, not application logic.
//!
//! After setup the proxy is a pure pass-through. Its only special-cased
//! message is the resource-ready control message carrying the guest HTML;
//! everything else relays verbatim, preserving message identity and
//! per-direction ordering. It never interprets protocol-level content.

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::core::constants::sandbox as control;
use crate::core::errors::SandboxError;
use crate::transport::frame::{FrameMessage, MessagePort};

/// What the proxy can observe about its own placement in the frame tree.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Whether the proxy document is embedded in another frame
    pub embedded: bool,
    /// The embedding document's origin, if the platform disclosed one
    pub referrer: Option<String>,
}

/// The expected outcome of the escape probe: the platform blocked the
/// attempt to reach the top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeBlocked;

/// An operation that is only possible if the top-level window is reachable.
/// Returning `Ok` means isolation is broken.
pub type EscapeProbe = Box<dyn FnOnce() -> Result<(), EscapeBlocked> + Send>;

/// Content loaded into the nested frame by the resource-ready control
/// message.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedResource {
    pub html: String,
    pub sandbox_attribute: String,
}

/// The relay frame. Owns the outer (host-facing) port and the inner port
/// of the nested guest frame.
pub struct SandboxProxy {
    outer: MessagePort,
    nested: MessagePort,
    guest_port: Option<MessagePort>,
    host_origin: String,
    default_sandbox_attribute: String,
    resource_tx: watch::Sender<Option<LoadedResource>>,
}

impl SandboxProxy {
    /// Validate placement, run the escape self-test, and create the nested
    /// frame. Any failure here is a configuration bug and aborts
    /// initialization entirely; the nested frame is never created.
    pub fn initialize(
        config: &SandboxConfig,
        context: FrameContext,
        outer: MessagePort,
        probe: EscapeProbe,
    ) -> Result<Self, SandboxError> {
        if !context.embedded {
            return Err(SandboxError::NotEmbedded);
        }
        let referrer = context.referrer.ok_or(SandboxError::MissingReferrer)?;
        if !config.allows_origin(&referrer) {
            return Err(SandboxError::ReferrerDenied(referrer));
        }

        // The probe must hit the platform's cross-origin wall. If it does
        // not, the frame hierarchy is misconfigured and nothing may run.
        match probe() {
            Ok(()) => return Err(SandboxError::IsolationBroken),
            Err(EscapeBlocked) => {}
        }

        info!(embedder = %referrer, "sandbox proxy initialized");

        let (nested, guest_port) = MessagePort::pair(outer.origin().to_string(), "null");
        let (resource_tx, _) = watch::channel(None);

        Ok(Self {
            outer,
            nested,
            guest_port: Some(guest_port),
            host_origin: referrer,
            default_sandbox_attribute: config.default_sandbox_attribute.clone(),
            resource_tx,
        })
    }

    /// The guest-facing end of the nested frame. Yields `None` after the
    /// first call.
    pub fn take_guest_port(&mut self) -> Option<MessagePort> {
        self.guest_port.take()
    }

    /// Observe the resource loaded into the nested frame.
    pub fn resource_watch(&self) -> watch::Receiver<Option<LoadedResource>> {
        self.resource_tx.subscribe()
    }

    /// Signal readiness to the host, then relay until either side goes
    /// away. Consumes the proxy; the nested frame dies with it.
    pub async fn run(self) {
        let mut outer_rx = match self.outer.take_receiver().await {
            Some(rx) => rx,
            None => return,
        };
        let mut nested_rx = match self.nested.take_receiver().await {
            Some(rx) => rx,
            None => return,
        };

        let ready = serde_json::json!({
            "jsonrpc": "2.0",
            "method": control::PROXY_READY,
        });
        if self.outer.post(ready).await.is_err() {
            warn!("host went away before proxy-ready");
            return;
        }

        loop {
            tokio::select! {
                msg = outer_rx.recv() => match msg {
                    Some(msg) => {
                        if !self.relay_inward(msg).await {
                            break;
                        }
                    }
                    None => {
                        debug!("host side closed; stopping relay");
                        break;
                    }
                },
                msg = nested_rx.recv() => match msg {
                    Some(msg) => {
                        // Everything from the nested frame relays verbatim
                        if self.outer.post(msg.payload).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("nested frame closed; stopping relay");
                        break;
                    }
                },
            }
        }
    }

    /// Handle one message arriving from the outer window. Returns false
    /// when relaying can no longer proceed.
    async fn relay_inward(&self, msg: FrameMessage) -> bool {
        // No other message sources are honored
        if msg.origin != self.host_origin {
            warn!(origin = %msg.origin, "dropping outer message from unexpected source");
            return true;
        }

        if let Some(resource) = parse_resource_ready(&msg.payload) {
            let sandbox_attribute = resource
                .sandbox
                .unwrap_or_else(|| self.default_sandbox_attribute.clone());
            info!(sandbox = %sandbox_attribute, "loading guest resource into nested frame");
            let _ = self.resource_tx.send(Some(LoadedResource {
                html: resource.html,
                sandbox_attribute,
            }));
            return true;
        }

        self.nested.post(msg.payload).await.is_ok()
    }
}

fn parse_resource_ready(payload: &Value) -> Option<crate::core::types::SandboxResourceReady> {
    let obj = payload.as_object()?;
    if obj.get("method").and_then(Value::as_str) != Some(control::RESOURCE_READY) {
        return None;
    }
    serde_json::from_value(obj.get("params").cloned().unwrap_or(Value::Null)).ok()
}
