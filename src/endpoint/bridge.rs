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

//! Host endpoint ("Bridge").
//!
//! Answers the guest's handshake, forwards guest-initiated calls to the
//! real backend connection, and pushes host-initiated notifications to the
//! guest. For any single tool invocation the complete tool-input arguments
//! must be sent once, strictly before the tool-result notification; that
//! ordering is a caller contract, not something the engine rejects.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::core::constants::methods;
use crate::core::envelope::JsonRpcError;
use crate::core::errors::{HandlerError, RequestError, TransportError};
use crate::core::types::{
    AppCapabilities, HostContext, HostContextChangedNotification, Implementation,
    InitializeRequest, InitializeResult, SessionId, SizeChangeNotification,
    ToolInputNotification, ToolInputPartialNotification, ToolResultNotification,
};
use crate::rpc::{MethodGate, ProtocolEngine, RequestOptions};
use crate::transport::Transport;

/// Capability categories the backend actually supports. Forwarders are
/// installed only for these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

/// The real backend connection the bridge proxies guest calls to. The
/// bridge relays requests and results verbatim and honors cancellation
/// end-to-end; it never interprets backend payloads.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<Value, JsonRpcError>;

    /// Backend-originated notifications (method, params), e.g. list_changed.
    async fn subscribe(&self) -> mpsc::Receiver<(String, Option<Value>)>;
}

struct GuestSession {
    id: SessionId,
    app_capabilities: AppCapabilities,
    app_info: Implementation,
}

/// Host-side protocol endpoint.
pub struct Bridge {
    engine: ProtocolEngine,
    config: HostConfig,
    session: Arc<Mutex<Option<GuestSession>>>,
    ready_tx: watch::Sender<bool>,
}

impl Bridge {
    pub fn new(config: HostConfig) -> Self {
        let engine = ProtocolEngine::new(MethodGate::for_host(&config.capabilities));
        let session: Arc<Mutex<Option<GuestSession>>> = Arc::new(Mutex::new(None));
        let (ready_tx, _) = watch::channel(false);

        let bridge = Self {
            engine,
            config,
            session,
            ready_tx,
        };
        bridge.install_handshake_handlers();
        bridge
    }

    fn install_handshake_handlers(&self) {
        let session = self.session.clone();
        let versions = self.config.supported_versions.clone();
        let capabilities = self.config.capabilities.clone();
        let host_info = self.config.host_info.clone();

        self.engine.replace_request_handler(
            methods::INITIALIZE,
            Arc::new(move |params, _ctx| {
                let session = session.clone();
                let versions = versions.clone();
                let capabilities = capabilities.clone();
                let host_info = host_info.clone();
                Box::pin(async move {
                    let request: InitializeRequest =
                        serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
                            JsonRpcError {
                                code: crate::core::constants::jsonrpc::ERROR_INVALID_PARAMS,
                                message: e.to_string(),
                                data: None,
                            }
                        })?;

                    let negotiated = versions.negotiate(&request.protocol_version);
                    let session_id = SessionId::generate();
                    info!(
                        session = %session_id,
                        app = %request.app_info.name,
                        version = %negotiated,
                        "guest initialize accepted"
                    );
                    {
                        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                        *session = Some(GuestSession {
                            id: session_id,
                            app_capabilities: request.app_capabilities,
                            app_info: request.app_info,
                        });
                    }

                    let result = InitializeResult {
                        protocol_version: negotiated,
                        host_capabilities: capabilities,
                        host_info,
                    };
                    serde_json::to_value(result).map_err(|e| JsonRpcError {
                        code: crate::core::constants::jsonrpc::ERROR_INTERNAL,
                        message: e.to_string(),
                        data: None,
                    })
                })
            }),
        );

        let ready_tx = self.ready_tx.clone();
        // Guest is live only after the initialized notification
        let _ = self.engine.on_notification(
            methods::INITIALIZED,
            move |_: Option<Value>| {
                let ready_tx = ready_tx.clone();
                async move {
                    info!("guest reported initialized");
                    let _ = ready_tx.send(true);
                }
            },
        );
    }

    /// Attach the guest-facing transport and start dispatching.
    pub async fn bind(&self, transport: Arc<dyn Transport>) -> Result<(), TransportError> {
        self.engine.bind(transport).await
    }

    /// Readiness signal: flips to true once the guest has acknowledged
    /// initialization.
    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Await guest readiness.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Invoke `callback` once the guest acknowledges initialization.
    pub fn on_guest_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut rx = self.ready_tx.subscribe();
        tokio::spawn(async move {
            loop {
                if *rx.borrow_and_update() {
                    callback();
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Identifier of the current guest session, assigned when the guest's
    /// initialize request is accepted.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.id)
    }

    /// Capabilities the guest declared during the handshake.
    pub fn app_capabilities(&self) -> Option<AppCapabilities> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.app_capabilities.clone())
    }

    pub fn app_info(&self) -> Option<Implementation> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.app_info.clone())
    }

    /// Install request/notification forwarders for each capability category
    /// the backend actually supports. Results are relayed verbatim and
    /// cancellation is honored end-to-end.
    pub async fn install_backend_forwarding(
        &self,
        backend: Arc<dyn BackendConnection>,
    ) -> Result<(), HandlerError> {
        let caps = backend.capabilities();

        let mut forwarded_requests: Vec<&str> = Vec::new();
        if caps.tools {
            forwarded_requests.push(methods::TOOLS_CALL);
        }
        if caps.resources {
            forwarded_requests.push(methods::RESOURCES_LIST);
            forwarded_requests.push(methods::RESOURCES_TEMPLATES_LIST);
        }
        if caps.prompts {
            forwarded_requests.push(methods::PROMPTS_LIST);
        }

        for method in &forwarded_requests {
            let backend = backend.clone();
            let method_owned = method.to_string();
            self.engine.set_request_handler(
                method,
                Arc::new(move |params, ctx| {
                    let backend = backend.clone();
                    let method = method_owned.clone();
                    Box::pin(async move {
                        debug!(%method, "forwarding guest request to backend");
                        backend.request(&method, params, ctx.cancel).await
                    })
                }),
            )?;
        }

        // Relay backend list_changed notifications for supported categories
        let mut backend_events = backend.subscribe().await;
        let engine = self.engine.clone();
        let closed = self.engine.closed();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = closed.cancelled() => break,
                    event = backend_events.recv() => match event {
                        Some(e) => e,
                        None => break,
                    },
                };
                let (method, params) = event;
                let allowed = match method.as_str() {
                    m if m == methods::TOOLS_LIST_CHANGED => caps.tools,
                    m if m == methods::RESOURCES_LIST_CHANGED => caps.resources,
                    m if m == methods::PROMPTS_LIST_CHANGED => caps.prompts,
                    _ => false,
                };
                if !allowed {
                    debug!(%method, "dropping backend notification outside declared categories");
                    continue;
                }
                if let Err(e) = engine.notification(&method, params).await {
                    warn!(%method, error = %e, "failed to relay backend notification");
                    break;
                }
            }
        });

        Ok(())
    }

    // ---- host-initiated pushes ----

    /// Push complete tool-input arguments. Must be sent once per invocation,
    /// strictly before that invocation's tool result.
    pub async fn send_tool_input(
        &self,
        input: ToolInputNotification,
    ) -> Result<(), RequestError> {
        self.notify_json(methods::TOOL_INPUT, &input).await
    }

    /// Push streaming partial tool input.
    pub async fn send_tool_input_partial(
        &self,
        input: ToolInputPartialNotification,
    ) -> Result<(), RequestError> {
        self.notify_json(methods::TOOL_INPUT_PARTIAL, &input).await
    }

    /// Push a tool execution result. The matching tool-input notification
    /// must already have been sent.
    pub async fn send_tool_result(
        &self,
        result: ToolResultNotification,
    ) -> Result<(), RequestError> {
        self.notify_json(methods::TOOL_RESULT, &result).await
    }

    pub async fn send_host_context_changed(
        &self,
        context: HostContext,
    ) -> Result<(), RequestError> {
        self.notify_json(
            methods::HOST_CONTEXT_CHANGED,
            &HostContextChangedNotification { context },
        )
        .await
    }

    pub async fn send_size_change(&self, width: f64, height: f64) -> Result<(), RequestError> {
        self.notify_json(
            methods::SIZE_CHANGE,
            &SizeChangeNotification { width, height },
        )
        .await
    }

    /// Ask the host to relay a liveness check to the guest.
    pub async fn ping(&self) -> Result<Value, RequestError> {
        self.engine
            .request(methods::PING, None, RequestOptions::default())
            .await
    }

    /// Issue a teardown request and wait a bounded time for the guest's
    /// acknowledgement (letting it persist state), then close the transport.
    /// A guest that fails to respond in time is torn down anyway.
    pub async fn teardown(&self) {
        let outcome = self
            .engine
            .request(
                methods::RESOURCE_TEARDOWN,
                None,
                RequestOptions::with_timeout(self.config.teardown_timeout),
            )
            .await;
        match outcome {
            Ok(_) => debug!("guest acknowledged teardown"),
            Err(RequestError::Timeout(d)) => {
                warn!(waited = ?d, "guest did not acknowledge teardown; destroying frame anyway");
            }
            Err(e) => {
                warn!(error = %e, "teardown request failed; destroying frame anyway");
            }
        }
        self.engine.close().await;
        let _ = self.ready_tx.send(false);
    }

    /// Invoke `callback` when the sandbox proxy announces readiness; the
    /// guest HTML may be pushed from that point on.
    pub fn on_proxy_ready<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.engine.on_notification(
            crate::core::constants::sandbox::PROXY_READY,
            move |_: Option<Value>| f(),
        )
    }

    /// Push the actual guest HTML (and optional sandbox attribute override)
    /// into the sandbox proxy for loading into the nested frame.
    pub async fn send_resource(
        &self,
        resource: crate::core::types::SandboxResourceReady,
    ) -> Result<(), RequestError> {
        self.notify_json(crate::core::constants::sandbox::RESOURCE_READY, &resource)
            .await
    }

    /// Handle chat-style messages from the guest.
    pub fn on_message<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(crate::core::types::MessageParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        self.engine.set_request_handler(
            methods::MESSAGE,
            crate::rpc::engine::request_handler(move |params, _ctx| f(params)),
        )
    }

    /// Handle open-link requests from the guest. Returning an error refuses
    /// the link.
    pub fn on_open_link<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(crate::core::types::OpenLinkParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        self.engine.set_request_handler(
            methods::OPEN_LINK,
            crate::rpc::engine::request_handler(move |params, _ctx| f(params)),
        )
    }

    /// The underlying engine, for explicit handler-map registration of
    /// methods without a typed wrapper here.
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    async fn notify_json<P: serde::Serialize>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<(), RequestError> {
        let params = serde_json::to_value(params)
            .map_err(|e| RequestError::MalformedResult(e.to_string()))?;
        self.engine.notification(method, Some(params)).await
    }
}
