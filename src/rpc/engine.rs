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

//! Protocol engine: request/response correlation, notification dispatch,
//! cancellation and timeout bookkeeping.
//!
//! Correlation is by id, never by arrival order, so responses may arrive
//! out of order and are still matched. Ids issued by one engine instance
//! are strictly increasing and never reused while outstanding. A response
//! for an id no longer pending (late, cancelled, or never ours) is ignored
//! with a log, not an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::constants::{jsonrpc, limits, methods};
use crate::core::envelope::{Envelope, JsonRpcResponse, RequestId};
use crate::core::errors::{HandlerError, RequestError, TransportError};
use crate::rpc::handlers::{
    BoxFuture, HandlerRegistry, MethodGate, NotificationHandler, RequestContext, RequestHandler,
};
use crate::transport::{Transport, TransportEvent};

/// Options for a single outbound request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Reject with a timeout error after this long. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation. Firing rejects the request locally; a
    /// response arriving afterwards is discarded, not an error.
    pub cancel: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Some(limits::DEFAULT_REQUEST_TIMEOUT),
            cancel: None,
        }
    }
}

impl RequestOptions {
    pub fn no_timeout() -> Self {
        Self {
            timeout: None,
            cancel: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

struct EngineInner {
    transport: Mutex<Option<Arc<dyn Transport>>>,
    registry: Mutex<HandlerRegistry>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
    /// Cancelled when the transport reports closure; request contexts and
    /// endpoint state machines key off it.
    closed: CancellationToken,
    transport_closed_seen: AtomicBool,
    /// Notifications are handled one at a time in arrival order, so a
    /// handler for one always finishes before the next starts.
    notify_tx: mpsc::UnboundedSender<(NotificationHandler, Option<Value>)>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<(NotificationHandler, Option<Value>)>>>,
}

/// Transport-agnostic JSON-RPC endpoint core, used identically by both
/// sides of the bridge.
#[derive(Clone)]
pub struct ProtocolEngine {
    inner: Arc<EngineInner>,
}

impl ProtocolEngine {
    pub fn new(gate: MethodGate) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(EngineInner {
                transport: Mutex::new(None),
                registry: Mutex::new(HandlerRegistry::new(gate)),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: CancellationToken::new(),
                transport_closed_seen: AtomicBool::new(false),
                notify_tx,
                notify_rx: Mutex::new(Some(notify_rx)),
            }),
        }
    }

    /// Attach and start a transport, then run the dispatch loop in a
    /// background task. May be called once per engine.
    pub async fn bind(&self, transport: Arc<dyn Transport>) -> Result<(), TransportError> {
        let mut events = transport.start().await?;
        {
            let mut slot = self
                .inner
                .transport
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Err(TransportError::SendFailed("engine already bound".into()));
            }
            *slot = Some(transport);
        }

        // Notification worker: drains the queue sequentially so handlers
        // observe notifications in arrival order, while keeping slow
        // handlers off the response path.
        let notify_rx = {
            let mut slot = self
                .inner
                .notify_rx
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(mut rx) = notify_rx {
            tokio::spawn(async move {
                while let Some((handler, params)) = rx.recv().await {
                    handler(params).await;
                }
            });
        }

        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(envelope) => engine.dispatch(envelope).await,
                    TransportEvent::Error(e) => {
                        // Recovered locally; the connection stays up
                        warn!(error = %e, "transport error");
                    }
                    TransportEvent::Closed => break,
                }
            }
            engine.handle_transport_closed();
        });

        Ok(())
    }

    /// Fires when the underlying transport has closed, locally or remotely.
    pub fn closed(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Close the transport and reject every in-flight request exactly once.
    pub async fn close(&self) {
        let transport = {
            let slot = self
                .inner
                .transport
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        if let Some(t) = transport {
            if let Err(e) = t.close().await {
                debug!(error = %e, "transport close reported an error");
            }
        }
        // The dispatch task also lands here via the Closed event; both paths
        // are idempotent.
        self.handle_transport_closed();
    }

    fn handle_transport_closed(&self) {
        if self
            .inner
            .transport_closed_seen
            .swap(true, Ordering::SeqCst)
        {
            return;
        }
        let drained: Vec<_> = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "rejecting in-flight requests on close");
        }
        drop(drained); // dropping the senders rejects the waiting futures
        self.inner.closed.cancel();
    }

    /// Send a request and await its typed outcome.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let id = RequestId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.insert(id, tx);
        }

        if let Err(e) = self.send(Envelope::request(id, method, params)).await {
            self.remove_pending(id);
            return Err(RequestError::Transport(e.to_string()));
        }

        let timeout_fut = async {
            match options.timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let cancel_fut = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel_fut => {
                self.remove_pending(id);
                debug!(%id, method, "request cancelled locally");
                Err(RequestError::Cancelled)
            }
            _ = timeout_fut => {
                self.remove_pending(id);
                debug!(%id, method, "request timed out");
                // unwrap is safe: this arm only runs with a timeout set
                Err(RequestError::Timeout(options.timeout.unwrap_or_default()))
            }
            res = rx => match res {
                Ok(response) => match response.error {
                    Some(e) => Err(RequestError::Remote(e)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                },
                Err(_) => Err(RequestError::Transport("transport closed".into())),
            }
        }
    }

    /// Send a notification. No pending state; rejection only on transport
    /// send failure.
    pub async fn notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), RequestError> {
        self.send(Envelope::notification(method, params))
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))
    }

    pub fn set_request_handler(
        &self,
        method: &str,
        handler: RequestHandler,
    ) -> Result<(), HandlerError> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_request(method, handler)
    }

    pub fn set_notification_handler(
        &self,
        method: &str,
        handler: NotificationHandler,
    ) -> Result<(), HandlerError> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_notification(method, handler)
    }

    /// Typed notification registration sugar over the raw handler map.
    pub fn on_notification<P, F, Fut>(&self, method: &str, f: F) -> Result<(), HandlerError>
    where
        P: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let method_owned = method.to_string();
        let handler: NotificationHandler = Arc::new(move |params| {
            let value = params.unwrap_or(Value::Null);
            match serde_json::from_value::<P>(value) {
                Ok(typed) => Box::pin(f(typed)) as BoxFuture<()>,
                Err(e) => {
                    // Transports validate known methods already; this guards
                    // extension methods with caller-declared shapes
                    warn!(method = %method_owned, error = %e, "notification params failed to parse");
                    Box::pin(async {})
                }
            }
        });
        self.set_notification_handler(method, handler)
    }

    pub(crate) fn replace_request_handler(&self, method: &str, handler: RequestHandler) {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace_request(method, handler);
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let transport = {
            let slot = self
                .inner
                .transport
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        match transport {
            Some(t) if !self.is_closed() => t.send(envelope).await,
            _ => Err(TransportError::Closed),
        }
    }

    fn remove_pending(&self, id: RequestId) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    /// Inbound dispatch. Responses resolve their pending entry; requests
    /// invoke the registered handler and always produce a reply; notifications
    /// invoke the registered handler with no reply expected.
    pub async fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => {
                let waiter = {
                    let mut pending = self
                        .inner
                        .pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    pending.remove(&response.id)
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(id = %response.id, "ignoring response with no pending entry");
                    }
                }
            }
            Envelope::Request(request) => {
                let handler = {
                    let registry = self
                        .inner
                        .registry
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    registry.request(&request.method)
                };
                let id = request.id;
                let method = request.method.clone();

                // Liveness check is always answered, whatever was declared
                if handler.is_none() && method == methods::PING {
                    if let Err(e) = self.send(Envelope::response(id, Value::Object(Default::default()))).await {
                        debug!(error = %e, "failed to answer ping");
                    }
                    return;
                }

                let Some(handler) = handler else {
                    debug!(%id, method, "no handler registered for request");
                    let reply = Envelope::error_response(
                        id,
                        jsonrpc::ERROR_METHOD_NOT_FOUND,
                        format!("method '{method}' not found"),
                    );
                    if let Err(e) = self.send(reply).await {
                        debug!(error = %e, "failed to send method-not-found reply");
                    }
                    return;
                };

                let engine = self.clone();
                let ctx = RequestContext {
                    id,
                    cancel: self.inner.closed.child_token(),
                };
                tokio::spawn(async move {
                    let reply = match handler(request.params, ctx).await {
                        Ok(result) => Envelope::response(id, result),
                        // Handler failure becomes a structured error reply,
                        // never an unhandled rejection on this side
                        Err(e) => Envelope::Response(JsonRpcResponse {
                            jsonrpc: jsonrpc::VERSION.to_string(),
                            id,
                            result: None,
                            error: Some(e),
                        }),
                    };
                    if let Err(e) = engine.send(reply).await {
                        debug!(%id, error = %e, "failed to send reply");
                    }
                });
            }
            Envelope::Notification(notification) => {
                let handler = {
                    let registry = self
                        .inner
                        .registry
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    registry.notification(&notification.method)
                };
                match handler {
                    Some(handler) => {
                        let _ = self
                            .inner
                            .notify_tx
                            .send((handler, notification.params));
                    }
                    None => {
                        debug!(method = %notification.method, "no handler for notification");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Convenience constructor for request handlers from typed async closures.
pub fn request_handler<P, R, F, Fut>(f: F) -> RequestHandler
where
    P: serde::de::DeserializeOwned + Send + 'static,
    R: serde::Serialize + 'static,
    F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<R, crate::core::envelope::JsonRpcError>>
        + Send
        + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |params, ctx| {
        let f = f.clone();
        Box::pin(async move {
            let value = params.unwrap_or(Value::Null);
            let typed = serde_json::from_value::<P>(value).map_err(|e| {
                crate::core::envelope::JsonRpcError {
                    code: jsonrpc::ERROR_INVALID_PARAMS,
                    message: e.to_string(),
                    data: None,
                }
            })?;
            let result = f(typed, ctx).await?;
            serde_json::to_value(result).map_err(|e| crate::core::envelope::JsonRpcError {
                code: jsonrpc::ERROR_INTERNAL,
                message: e.to_string(),
                data: None,
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::{FrameTransport, MessagePort};
    use serde_json::json;

    async fn bound_pair() -> (ProtocolEngine, ProtocolEngine) {
        let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let host = ProtocolEngine::new(MethodGate::open());
        let guest = ProtocolEngine::new(MethodGate::open());
        host.bind(Arc::new(FrameTransport::new(host_port)))
            .await
            .unwrap();
        guest
            .bind(Arc::new(FrameTransport::new(guest_port)))
            .await
            .unwrap();
        (host, guest)
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let (host, guest) = bound_pair().await;
        host.set_request_handler(
            "echo",
            Arc::new(|params, _ctx| {
                Box::pin(async move { Ok(params.unwrap_or(Value::Null)) })
            }),
        )
        .unwrap();

        let result = guest
            .request("echo", Some(json!({"x": 1})), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn ping_is_always_answered() {
        let (_host, guest) = bound_pair().await;
        let result = guest
            .request(methods::PING, None, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn unknown_method_gets_structured_error() {
        let (_host, guest) = bound_pair().await;
        let err = guest
            .request("no/such", None, RequestOptions::default())
            .await
            .unwrap_err();
        match err {
            RequestError::Remote(e) => assert_eq!(e.code, jsonrpc::ERROR_METHOD_NOT_FOUND),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_error_becomes_remote_error() {
        let (host, guest) = bound_pair().await;
        host.set_request_handler(
            "fail",
            Arc::new(|_params, _ctx| {
                Box::pin(async {
                    Err(crate::core::envelope::JsonRpcError {
                        code: jsonrpc::ERROR_INTERNAL,
                        message: "boom".into(),
                        data: None,
                    })
                })
            }),
        )
        .unwrap();

        let err = guest
            .request("fail", None, RequestOptions::default())
            .await
            .unwrap_err();
        match err {
            RequestError::Remote(e) => assert_eq!(e.message, "boom"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_rejects_and_removes_entry() {
        let (host, guest) = bound_pair().await;
        host.set_request_handler(
            "slow",
            Arc::new(|_params, _ctx| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                })
            }),
        )
        .unwrap();

        let err = guest
            .request("slow", None, RequestOptions::with_timeout(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_rejects_and_late_response_is_discarded() {
        let (host, guest) = bound_pair().await;
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = std::sync::Mutex::new(Some(release_rx));
        host.set_request_handler(
            "held",
            Arc::new(move |_params, _ctx| {
                let rx = release_rx.lock().unwrap().take();
                Box::pin(async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok(json!("late"))
                })
            }),
        )
        .unwrap();

        let token = CancellationToken::new();
        let guest_clone = guest.clone();
        let options = RequestOptions::no_timeout().with_cancel(token.clone());
        let handle =
            tokio::spawn(async move { guest_clone.request("held", None, options).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RequestError::Cancelled));

        // The late response must produce no observable effect
        let _ = release_tx.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!guest.is_closed());
    }

    #[tokio::test]
    async fn unmatched_response_is_ignored() {
        let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let guest = ProtocolEngine::new(MethodGate::open());
        guest
            .bind(Arc::new(FrameTransport::new(guest_port)))
            .await
            .unwrap();

        host_port
            .post(json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!guest.is_closed());
    }

    #[tokio::test]
    async fn transport_close_rejects_in_flight_requests() {
        let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
        let guest = ProtocolEngine::new(MethodGate::open());
        guest
            .bind(Arc::new(FrameTransport::new(guest_port)))
            .await
            .unwrap();

        let engine = guest.clone();
        let handle = tokio::spawn(async move {
            engine
                .request("hang", None, RequestOptions::no_timeout())
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(host_port); // peer goes away
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RequestError::Transport(_)));
        assert!(guest.is_closed());
    }

    #[tokio::test]
    async fn notifications_are_handled_in_arrival_order() {
        let (host, guest) = bound_pair().await;
        let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Mutex::new(Some(done_tx));
        {
            let seen = seen.clone();
            guest
                .set_notification_handler(
                    "tick",
                    Arc::new(move |params| {
                        let n = params
                            .as_ref()
                            .and_then(|p| p.get("n"))
                            .and_then(|n| n.as_i64())
                            .unwrap_or(-1);
                        seen.lock().unwrap().push(n);
                        let done = if n == 31 {
                            done_tx.lock().unwrap().take()
                        } else {
                            None
                        };
                        Box::pin(async move {
                            // Yield inside the handler; order must still hold
                            tokio::task::yield_now().await;
                            if let Some(tx) = done {
                                let _ = tx.send(());
                            }
                        })
                    }),
                )
                .unwrap();
        }

        for n in 0..32 {
            host.notification("tick", Some(json!({"n": n}))).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("all ticks handled")
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn ids_are_unique_while_outstanding() {
        let (_host, guest) = bound_pair().await;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = guest.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .request(
                        "no/such",
                        None,
                        RequestOptions::with_timeout(Duration::from_secs(5)),
                    )
                    .await
            }));
        }
        for h in handles {
            // Every request resolves independently (method-not-found), which
            // only works if every id correlated to its own entry
            let err = h.await.unwrap().unwrap_err();
            assert!(matches!(err, RequestError::Remote(_)));
        }
    }
}
