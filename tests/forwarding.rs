use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sandbridge::config::HostConfig;
use sandbridge::core::envelope::JsonRpcError;
use sandbridge::core::errors::{HandlerError, RequestError};
use sandbridge::core::types::{
    AppCapabilities, CallToolParams, CapabilityMarker, HostCapabilities, HostContext,
    Implementation, ToolInputNotification, ToolResultNotification,
};
use sandbridge::endpoint::{App, AppOptions, BackendCapabilities, BackendConnection, Bridge};
use sandbridge::transport::frame::{FrameTransport, MessagePort};

/// Records every request it receives and echoes canned responses.
struct StubBackend {
    caps: BackendCapabilities,
    requests: Mutex<Vec<(String, Option<Value>)>>,
    notifications_tx: Mutex<Option<mpsc::Sender<(String, Option<Value>)>>>,
    notifications_rx: Mutex<Option<mpsc::Receiver<(String, Option<Value>)>>>,
}

impl StubBackend {
    fn new(caps: BackendCapabilities) -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            caps,
            requests: Mutex::new(Vec::new()),
            notifications_tx: Mutex::new(Some(tx)),
            notifications_rx: Mutex::new(Some(rx)),
        }
    }

    fn push_notification(&self, method: &str, params: Option<Value>) {
        let tx = self
            .notifications_tx
            .lock()
            .unwrap()
            .clone()
            .expect("backend notification channel");
        let method = method.to_string();
        tokio::spawn(async move {
            let _ = tx.send((method, params)).await;
        });
    }
}

#[async_trait]
impl BackendConnection for StubBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        _cancel: CancellationToken,
    ) -> Result<Value, JsonRpcError> {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        match method {
            "tools/call" => Ok(json!({"content": []})),
            "resources/list" => Ok(json!({"resources": [
                {"uri": "ui://demo/main", "mimeType": "text/html+mcp"}
            ]})),
            "prompts/list" => Ok(json!({"prompts": []})),
            _ => Ok(json!({})),
        }
    }

    async fn subscribe(&self) -> mpsc::Receiver<(String, Option<Value>)> {
        self.notifications_rx
            .lock()
            .unwrap()
            .take()
            .expect("subscribe called once")
    }
}

fn full_host_config() -> HostConfig {
    HostConfig::new(Implementation {
        name: "host".into(),
        version: "1".into(),
    })
    .with_capabilities(HostCapabilities {
        tools: Some(CapabilityMarker {}),
        resources: Some(CapabilityMarker {}),
        prompts: Some(CapabilityMarker {}),
        open_link: Some(CapabilityMarker {}),
        ..Default::default()
    })
}

fn tool_app_options() -> AppOptions {
    AppOptions::new(Implementation {
        name: "app".into(),
        version: "1".into(),
    })
    .with_capabilities(AppCapabilities {
        tools: Some(CapabilityMarker {}),
        ..Default::default()
    })
}

async fn wired(config: HostConfig, options: AppOptions) -> (Bridge, App) {
    let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
    let bridge = Bridge::new(config);
    bridge
        .bind(Arc::new(FrameTransport::new(host_port)))
        .await
        .unwrap();
    let app = App::new(options);
    app.connect(Arc::new(FrameTransport::new(guest_port)))
        .await
        .unwrap();
    (bridge, app)
}

#[tokio::test]
async fn call_server_tool_relays_backend_result_verbatim() {
    let backend = Arc::new(StubBackend::new(BackendCapabilities {
        tools: true,
        ..Default::default()
    }));
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;
    bridge
        .install_backend_forwarding(backend.clone())
        .await
        .unwrap();

    let result = app
        .call_server_tool(CallToolParams {
            name: "x".into(),
            arguments: json!({}),
        })
        .await
        .unwrap();
    assert_eq!(result, json!({"content": []}));

    let recorded = backend.requests.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "tools/call");
    assert_eq!(
        recorded[0].1,
        Some(json!({"name": "x", "arguments": {}}))
    );
}

#[tokio::test]
async fn unsupported_backend_category_is_not_forwarded() {
    let backend = Arc::new(StubBackend::new(BackendCapabilities {
        tools: true,
        ..Default::default()
    }));
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;
    bridge
        .install_backend_forwarding(backend.clone())
        .await
        .unwrap();

    // resources/list has no forwarder because the backend has no resources
    let err = app
        .engine()
        .request(
            "resources/list",
            None,
            sandbridge::rpc::RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Remote(_)));
}

#[tokio::test]
async fn forwarding_requires_host_capability_declaration() {
    let backend = Arc::new(StubBackend::new(BackendCapabilities {
        tools: true,
        ..Default::default()
    }));
    // Host declared no tools capability, so installing a tools forwarder is
    // a synchronous programmer error.
    let config = HostConfig::new(Implementation {
        name: "host".into(),
        version: "1".into(),
    });
    let bridge = Bridge::new(config);
    let err = bridge
        .install_backend_forwarding(backend)
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::CapabilityNotSupported { .. }));
}

#[tokio::test]
async fn tool_input_arrives_strictly_before_tool_result() {
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));

    {
        let order = order.clone();
        app.on_tool_input(move |_n: ToolInputNotification| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push("input");
            }
        })
        .unwrap();
    }
    {
        let order = order.clone();
        app.on_tool_result(move |_n: ToolResultNotification| {
            let order = order.clone();
            let done_tx = done_tx.clone();
            async move {
                order.lock().unwrap().push("result");
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }
        })
        .unwrap();
    }

    bridge.wait_ready().await;
    bridge
        .send_tool_input(ToolInputNotification {
            invocation_id: Some("inv-1".into()),
            name: "chart".into(),
            arguments: json!({"points": 3}),
        })
        .await
        .unwrap();
    bridge
        .send_tool_result(ToolResultNotification {
            invocation_id: Some("inv-1".into()),
            result: json!({"content": []}),
        })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("tool result delivered")
        .unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["input", "result"]);
}

#[tokio::test]
async fn backend_list_changed_notifications_reach_the_guest() {
    let backend = Arc::new(StubBackend::new(BackendCapabilities {
        tools: true,
        ..Default::default()
    }));
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;
    bridge
        .install_backend_forwarding(backend.clone())
        .await
        .unwrap();

    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<()>();
    let seen_tx = Arc::new(Mutex::new(Some(seen_tx)));
    app.engine()
        .on_notification(
            "notifications/tools/list_changed",
            move |_: Option<Value>| {
                let seen_tx = seen_tx.clone();
                async move {
                    if let Some(tx) = seen_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                }
            },
        )
        .unwrap();

    backend.push_notification("notifications/tools/list_changed", None);
    tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .expect("list_changed relayed")
        .unwrap();
}

#[tokio::test]
async fn open_link_refusal_surfaces_as_remote_error() {
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;
    bridge
        .on_open_link(|params| async move {
            Err(JsonRpcError {
                code: -32000,
                message: format!("refusing to open {}", params.url),
                data: None,
            })
        })
        .unwrap();

    let err = app.open_link("https://elsewhere.example").await.unwrap_err();
    match err {
        RequestError::Remote(e) => assert!(e.message.contains("refusing")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn guest_message_reaches_host_handler() {
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        bridge
            .on_message(move |params| {
                let received = received.clone();
                async move {
                    received.lock().unwrap().push(params.text);
                    Ok(json!({}))
                }
            })
            .unwrap();
    }

    app.send_message("hello from the guest").await.unwrap();
    assert_eq!(
        *received.lock().unwrap(),
        vec!["hello from the guest".to_string()]
    );
}

#[tokio::test]
async fn host_context_change_reaches_guest() {
    let (bridge, app) = wired(full_host_config(), tool_app_options()).await;
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<Value>();
    let seen_tx = Arc::new(Mutex::new(Some(seen_tx)));
    app.on_host_context_changed(move |n| {
        let seen_tx = seen_tx.clone();
        async move {
            if let Some(tx) = seen_tx.lock().unwrap().take() {
                let _ = tx.send(n.context.body);
            }
        }
    })
    .unwrap();

    bridge.wait_ready().await;
    bridge
        .send_host_context_changed(HostContext {
            version: Some("1".into()),
            body: json!({"theme": "dark"}),
        })
        .await
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .expect("context delivered")
        .unwrap();
    assert_eq!(body, json!({"theme": "dark"}));
}

#[tokio::test]
async fn teardown_times_out_and_closes_anyway() {
    let config = full_host_config().with_teardown_timeout(Duration::from_millis(50));
    let (bridge, app) = wired(config, tool_app_options()).await;

    // Guest that never acknowledges teardown
    app.on_teardown(|| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    bridge.wait_ready().await;
    tokio::time::timeout(Duration::from_secs(5), bridge.teardown())
        .await
        .expect("teardown is bounded");
}
