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

//! Handler registry with capability gating.
//!
//! Exactly one handler per method. Registering a handler for a method not
//! covered by the endpoint's declared capabilities is a programmer error
//! signalled synchronously at registration time, not deferred to first use.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::constants::{methods, sandbox};
use crate::core::envelope::{JsonRpcError, RequestId};
use crate::core::errors::HandlerError;
use crate::core::types::{AppCapabilities, HostCapabilities};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Per-request state handed to a request handler. The token is cancelled
/// when the engine shuts down, so long-running handlers can bail out.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    pub cancel: CancellationToken,
}

pub type RequestHandler =
    Arc<dyn Fn(Option<Value>, RequestContext) -> BoxFuture<Result<Value, JsonRpcError>> + Send + Sync>;

pub type NotificationHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<()> + Send + Sync>;

/// The set of inbound methods an endpoint may legally register handlers
/// for, derived from its declared capability set.
#[derive(Debug, Clone)]
pub struct MethodGate {
    allowed: Option<HashSet<String>>,
}

impl MethodGate {
    /// No gating. Used by tests and by endpoints that manage their own
    /// method legality.
    pub fn open() -> Self {
        Self { allowed: None }
    }

    /// Inbound methods a guest endpoint may handle, given the capabilities
    /// it declared. Lifecycle methods are always legal.
    pub fn for_app(caps: &AppCapabilities) -> Self {
        let mut allowed: HashSet<String> = [
            methods::PING,
            methods::RESOURCE_TEARDOWN,
            methods::HOST_CONTEXT_CHANGED,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if caps.tools.is_some() {
            allowed.insert(methods::TOOL_INPUT.to_string());
            allowed.insert(methods::TOOL_INPUT_PARTIAL.to_string());
            allowed.insert(methods::TOOL_RESULT.to_string());
            allowed.insert(methods::TOOLS_LIST_CHANGED.to_string());
        }
        if caps.size_change.is_some() {
            allowed.insert(methods::SIZE_CHANGE.to_string());
        }

        Self {
            allowed: Some(allowed),
        }
    }

    /// Inbound methods a host endpoint may handle, given the capabilities
    /// it declared. Handshake methods are always legal.
    pub fn for_host(caps: &HostCapabilities) -> Self {
        let mut allowed: HashSet<String> = [
            methods::PING,
            methods::INITIALIZE,
            methods::INITIALIZED,
            methods::MESSAGE,
            sandbox::PROXY_READY,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if caps.tools.is_some() {
            allowed.insert(methods::TOOLS_CALL.to_string());
        }
        if caps.resources.is_some() {
            allowed.insert(methods::RESOURCES_LIST.to_string());
            allowed.insert(methods::RESOURCES_TEMPLATES_LIST.to_string());
        }
        if caps.prompts.is_some() {
            allowed.insert(methods::PROMPTS_LIST.to_string());
        }
        if caps.open_link.is_some() {
            allowed.insert(methods::OPEN_LINK.to_string());
        }
        if caps.size_change.is_some() {
            allowed.insert(methods::SIZE_CHANGE.to_string());
        }

        Self {
            allowed: Some(allowed),
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        // ping is always answerable, whatever was declared
        if method == methods::PING {
            return true;
        }
        match &self.allowed {
            Some(set) => set.contains(method),
            None => true,
        }
    }
}

/// Method-keyed handler maps for one endpoint.
pub(crate) struct HandlerRegistry {
    gate: MethodGate,
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl HandlerRegistry {
    pub(crate) fn new(gate: MethodGate) -> Self {
        Self {
            gate,
            requests: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    pub(crate) fn set_request(
        &mut self,
        method: &str,
        handler: RequestHandler,
    ) -> Result<(), HandlerError> {
        if !self.gate.allows(method) {
            return Err(HandlerError::CapabilityNotSupported {
                method: method.to_string(),
            });
        }
        if self.requests.contains_key(method) {
            return Err(HandlerError::AlreadyRegistered(method.to_string()));
        }
        self.requests.insert(method.to_string(), handler);
        Ok(())
    }

    pub(crate) fn set_notification(
        &mut self,
        method: &str,
        handler: NotificationHandler,
    ) -> Result<(), HandlerError> {
        if !self.gate.allows(method) {
            return Err(HandlerError::CapabilityNotSupported {
                method: method.to_string(),
            });
        }
        if self.notifications.contains_key(method) {
            return Err(HandlerError::AlreadyRegistered(method.to_string()));
        }
        self.notifications.insert(method.to_string(), handler);
        Ok(())
    }

    /// Unconditional overwrite, used by the endpoints for their built-in
    /// lifecycle handlers (default teardown reply, handshake answer).
    pub(crate) fn replace_request(&mut self, method: &str, handler: RequestHandler) {
        self.requests.insert(method.to_string(), handler);
    }

    pub(crate) fn request(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).cloned()
    }

    pub(crate) fn notification(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications.get(method).cloned()
    }
}
