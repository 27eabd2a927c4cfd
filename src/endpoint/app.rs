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

//! Guest endpoint ("App").
//!
//! Initiates the handshake, exposes registration for inbound notifications
//! and outbound calls to the host. Handlers should be registered before
//! [`App::connect`]: the host may emit notifications immediately after
//! acknowledging initialization, so late registration can silently miss the
//! first event. This is a documented ordering contract, not enforced at
//! runtime.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::constants::{limits, methods, versions};
use crate::core::envelope::JsonRpcError;
use crate::core::errors::{ConnectError, HandlerError, RequestError};
use crate::core::types::{
    AppCapabilities, CallToolParams, HostCapabilities, HostContextChangedNotification,
    Implementation, InitializeRequest, InitializeResult, MessageParams, OpenLinkParams,
    ProtocolVersion, SizeChangeNotification, ToolInputNotification,
    ToolInputPartialNotification, ToolResultNotification,
};
use crate::rpc::engine::request_handler;
use crate::rpc::{MethodGate, ProtocolEngine, RequestOptions};
use crate::transport::Transport;

/// Connection lifecycle. `Closed` is terminal and reachable from any state
/// on transport failure or explicit teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Disconnected,
    Connecting,
    AwaitingHandshakeResult,
    Initialized,
    Closed,
}

impl AppState {
    fn name(self) -> &'static str {
        match self {
            AppState::Disconnected => "disconnected",
            AppState::Connecting => "connecting",
            AppState::AwaitingHandshakeResult => "awaiting-handshake-result",
            AppState::Initialized => "initialized",
            AppState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub app_info: Implementation,
    pub capabilities: AppCapabilities,
    pub requested_version: ProtocolVersion,
    /// Versions this guest can actually speak. A host falling back to a
    /// version outside this set makes `connect` fail.
    pub acceptable_versions: Vec<ProtocolVersion>,
    /// Observe the rendered size and report changes for the session
    pub auto_size_reporting: bool,
}

impl AppOptions {
    pub fn new(app_info: Implementation) -> Self {
        Self {
            app_info,
            capabilities: AppCapabilities::default(),
            requested_version: ProtocolVersion::new(versions::LATEST),
            acceptable_versions: versions::KNOWN
                .iter()
                .map(|v| ProtocolVersion::new(*v))
                .collect(),
            auto_size_reporting: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: AppCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_requested_version(mut self, version: ProtocolVersion) -> Self {
        self.requested_version = version;
        self
    }

    pub fn with_auto_size_reporting(mut self) -> Self {
        self.auto_size_reporting = true;
        self
    }
}

struct Negotiated {
    version: ProtocolVersion,
    host_capabilities: HostCapabilities,
    host_info: Implementation,
}

/// Guest-side protocol endpoint.
pub struct App {
    engine: ProtocolEngine,
    options: AppOptions,
    state: Arc<Mutex<AppState>>,
    negotiated: Arc<Mutex<Option<Negotiated>>>,
    size_tx: watch::Sender<Option<SizeChangeNotification>>,
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        let engine = ProtocolEngine::new(MethodGate::for_app(&options.capabilities));

        // Default teardown reply; replaceable via on_teardown
        engine.replace_request_handler(
            methods::RESOURCE_TEARDOWN,
            request_handler(|_params: Value, _ctx| async move {
                Ok::<_, JsonRpcError>(serde_json::json!({}))
            }),
        );

        let (size_tx, _) = watch::channel(None);
        Self {
            engine,
            options,
            state: Arc::new(Mutex::new(AppState::Disconnected)),
            negotiated: Arc::new(Mutex::new(None)),
            size_tx,
        }
    }

    /// The underlying engine, for explicit handler-map registration of
    /// methods without a typed wrapper here.
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    pub fn state(&self) -> AppState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: AppState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == AppState::Closed {
            return; // terminal
        }
        debug!(from = state.name(), to = next.name(), "app state transition");
        *state = next;
    }

    /// Host capabilities negotiated during the handshake. `None` until
    /// `connect` resolves; immutable afterwards.
    pub fn host_capabilities(&self) -> Option<HostCapabilities> {
        self.negotiated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|n| n.host_capabilities.clone())
    }

    pub fn host_info(&self) -> Option<Implementation> {
        self.negotiated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|n| n.host_info.clone())
    }

    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.negotiated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|n| n.version.clone())
    }

    /// Perform the initialization handshake over `transport`.
    ///
    /// On failure the endpoint closes its own transport and the returned
    /// future rejects; there is no retry inside this layer. A transport
    /// close at any point during the handshake rejects exactly once.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<(), ConnectError> {
        {
            let state = self.state();
            if state != AppState::Disconnected {
                return Err(ConnectError::InvalidState(state.name()));
            }
        }
        self.set_state(AppState::Connecting);

        if let Err(e) = self.engine.bind(transport).await {
            self.set_state(AppState::Closed);
            return Err(ConnectError::Initialize(RequestError::Transport(
                e.to_string(),
            )));
        }

        // Track transport loss for the rest of the session
        {
            let state = self.state.clone();
            let closed = self.engine.closed();
            tokio::spawn(async move {
                closed.cancelled().await;
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                *state = AppState::Closed;
            });
        }

        self.set_state(AppState::AwaitingHandshakeResult);

        let init = InitializeRequest {
            protocol_version: self.options.requested_version.clone(),
            app_capabilities: self.options.capabilities.clone(),
            app_info: self.options.app_info.clone(),
        };
        let params = serde_json::to_value(&init)
            .map_err(|e| ConnectError::Initialize(RequestError::MalformedResult(e.to_string())))?;

        let raw = match self
            .engine
            .request(methods::INITIALIZE, Some(params), RequestOptions::default())
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.fail_connect().await;
                return Err(ConnectError::Initialize(e));
            }
        };

        let result = match parse_initialize_result(&raw) {
            Ok(r) => r,
            Err(e) => {
                self.fail_connect().await;
                return Err(e);
            }
        };

        if !self
            .options
            .acceptable_versions
            .contains(&result.protocol_version)
        {
            self.fail_connect().await;
            return Err(ConnectError::UnusableVersion(
                result.protocol_version.to_string(),
            ));
        }

        info!(
            version = %result.protocol_version,
            host = %result.host_info.name,
            "handshake complete"
        );
        {
            let mut negotiated = self.negotiated.lock().unwrap_or_else(|e| e.into_inner());
            *negotiated = Some(Negotiated {
                version: result.protocol_version,
                host_capabilities: result.host_capabilities,
                host_info: result.host_info,
            });
        }
        self.set_state(AppState::Initialized);

        if let Err(e) = self.engine.notification(methods::INITIALIZED, None).await {
            self.fail_connect().await;
            return Err(ConnectError::Initialize(e));
        }

        if self.options.auto_size_reporting {
            self.start_size_reporter();
        }

        Ok(())
    }

    async fn fail_connect(&self) {
        self.engine.close().await;
        self.set_state(AppState::Closed);
    }

    /// Explicit teardown from the guest side.
    pub async fn close(&self) {
        self.engine.close().await;
        self.set_state(AppState::Closed);
    }

    // ---- outbound calls ----

    /// Invoke a backend tool by name/arguments through the host.
    pub async fn call_server_tool(&self, params: CallToolParams) -> Result<Value, RequestError> {
        self.request_json(methods::TOOLS_CALL, &params, RequestOptions::default())
            .await
    }

    pub async fn call_server_tool_with_options(
        &self,
        params: CallToolParams,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        self.request_json(methods::TOOLS_CALL, &params, options).await
    }

    /// Send a chat-style message into the host's conversation.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<Value, RequestError> {
        let params = MessageParams { text: text.into() };
        self.request_json(methods::MESSAGE, &params, RequestOptions::default())
            .await
    }

    /// Ask the host to open an external link. The host may refuse, which
    /// surfaces as a remote error.
    pub async fn open_link(&self, url: impl Into<String>) -> Result<Value, RequestError> {
        let params = OpenLinkParams { url: url.into() };
        self.request_json(methods::OPEN_LINK, &params, RequestOptions::default())
            .await
    }

    /// Emit a manual size-change notification.
    pub async fn report_size(&self, width: f64, height: f64) -> Result<(), RequestError> {
        let params = SizeChangeNotification { width, height };
        self.engine
            .notification(
                methods::SIZE_CHANGE,
                Some(serde_json::to_value(params).unwrap_or(Value::Null)),
            )
            .await
    }

    /// Record a size observation for the debounced reporter. Multiple
    /// observations within one frame tick coalesce into one notification.
    pub fn observe_size(&self, width: f64, height: f64) {
        let _ = self
            .size_tx
            .send(Some(SizeChangeNotification { width, height }));
    }

    fn start_size_reporter(&self) {
        let mut rx = self.size_tx.subscribe();
        let engine = self.engine.clone();
        let closed = self.engine.closed();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let latest = { rx.borrow_and_update().clone() };
                if let Some(size) = latest {
                    let params = serde_json::to_value(size).unwrap_or(Value::Null);
                    if let Err(e) = engine.notification(methods::SIZE_CHANGE, Some(params)).await {
                        debug!(error = %e, "size-change notification failed");
                        break;
                    }
                }
                // One notification per frame tick, even under rapid resize
                tokio::time::sleep(limits::FRAME_TICK).await;
            }
        });
    }

    async fn request_json<P: serde::Serialize>(
        &self,
        method: &str,
        params: &P,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        if self.state() != AppState::Initialized {
            return Err(RequestError::Transport("endpoint not initialized".into()));
        }
        let params = serde_json::to_value(params)
            .map_err(|e| RequestError::MalformedResult(e.to_string()))?;
        self.engine.request(method, Some(params), options).await
    }

    // ---- inbound notification registration ----

    /// Complete tool input arguments for an invocation. Arrives strictly
    /// before the matching tool result.
    pub fn on_tool_input<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(ToolInputNotification) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.engine.on_notification(methods::TOOL_INPUT, f)
    }

    /// Streaming partial tool input.
    pub fn on_tool_input_partial<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(ToolInputPartialNotification) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.engine.on_notification(methods::TOOL_INPUT_PARTIAL, f)
    }

    /// Tool execution result.
    pub fn on_tool_result<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(ToolResultNotification) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.engine.on_notification(methods::TOOL_RESULT, f)
    }

    /// Host context changes (theme, viewport, and similar).
    pub fn on_host_context_changed<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(HostContextChangedNotification) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.engine.on_notification(methods::HOST_CONTEXT_CHANGED, f)
    }

    /// Host-granted viewport size changes.
    pub fn on_size_change<F, Fut>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(SizeChangeNotification) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.engine.on_notification(methods::SIZE_CHANGE, f)
    }

    /// Replace the default teardown acknowledgement with a handler that may
    /// persist state before replying. The host waits a bounded time only.
    pub fn on_teardown<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let f = Arc::new(f);
        self.engine.replace_request_handler(
            methods::RESOURCE_TEARDOWN,
            Arc::new(move |_params, _ctx| {
                let f = f.clone();
                Box::pin(async move {
                    f().await;
                    Ok(serde_json::json!({}))
                })
            }),
        );
        if self.state() == AppState::Initialized {
            warn!("teardown handler registered after connect; a pending teardown may have used the default reply");
        }
    }
}

fn parse_initialize_result(raw: &Value) -> Result<InitializeResult, ConnectError> {
    let obj = raw
        .as_object()
        .ok_or(ConnectError::MissingField("result"))?;
    if !obj.contains_key("protocolVersion") {
        return Err(ConnectError::MissingField("protocolVersion"));
    }
    if !obj.contains_key("hostCapabilities") {
        return Err(ConnectError::MissingField("hostCapabilities"));
    }
    if !obj.contains_key("hostInfo") {
        return Err(ConnectError::MissingField("hostInfo"));
    }
    serde_json::from_value::<InitializeResult>(raw.clone())
        .map_err(|e| ConnectError::Initialize(RequestError::MalformedResult(e.to_string())))
}
