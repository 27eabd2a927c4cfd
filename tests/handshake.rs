use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sandbridge::config::HostConfig;
use sandbridge::core::errors::ConnectError;
use sandbridge::core::types::{
    AppCapabilities, CapabilityMarker, HostCapabilities, Implementation, ProtocolVersion,
};
use sandbridge::endpoint::{App, AppOptions, Bridge};
use sandbridge::protocol::negotiation::SupportedVersions;
use sandbridge::transport::frame::{FrameTransport, MessagePort};
use sandbridge::transport::Transport;

fn host_info() -> Implementation {
    Implementation {
        name: "H".into(),
        version: "1".into(),
    }
}

fn app_info() -> Implementation {
    Implementation {
        name: "demo-app".into(),
        version: "0.1".into(),
    }
}

fn tools_host_config() -> HostConfig {
    HostConfig::new(host_info()).with_capabilities(HostCapabilities {
        tools: Some(CapabilityMarker {}),
        ..Default::default()
    })
}

async fn wired(bridge_config: HostConfig, app_options: AppOptions) -> (Bridge, App) {
    let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
    let bridge = Bridge::new(bridge_config);
    bridge
        .bind(Arc::new(FrameTransport::new(host_port)))
        .await
        .unwrap();
    let app = App::new(app_options);
    app.connect(Arc::new(FrameTransport::new(guest_port)))
        .await
        .unwrap();
    (bridge, app)
}

#[tokio::test]
async fn end_to_end_initialize_scenario() {
    // Guest sends ui/initialize {protocolVersion:"v1", appCapabilities:{}},
    // host responds with tools capability, guest acknowledges, connect
    // resolves and the host capabilities are readable.
    let config =
        tools_host_config().with_versions(SupportedVersions::new(["v1"]));
    let options = AppOptions::new(app_info())
        .with_requested_version(ProtocolVersion::new("v1"));

    let (bridge, app) = wired(config, options).await;

    assert_eq!(
        serde_json::to_value(app.host_capabilities().unwrap()).unwrap(),
        json!({"tools": {}})
    );
    assert_eq!(app.host_info().unwrap(), host_info());
    assert_eq!(app.negotiated_version().unwrap(), ProtocolVersion::new("v1"));

    bridge.wait_ready().await;
    assert_eq!(bridge.app_info().unwrap(), app_info());
    assert!(bridge.session_id().is_some());
}

#[tokio::test]
async fn unsupported_version_falls_back_and_connect_resolves() {
    let config = tools_host_config().with_versions(SupportedVersions::new(["v1"]));
    let options = AppOptions::new(app_info())
        .with_requested_version(ProtocolVersion::new("v99"));

    let (_bridge, app) = wired(config, options).await;
    assert_eq!(app.negotiated_version().unwrap(), ProtocolVersion::new("v1"));
}

#[tokio::test]
async fn host_fallback_outside_guest_versions_rejects_connect() {
    let config = tools_host_config()
        .with_versions(SupportedVersions::new(["vFuture"]));
    let options = AppOptions::new(app_info());

    let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
    let bridge = Bridge::new(config);
    bridge
        .bind(Arc::new(FrameTransport::new(host_port)))
        .await
        .unwrap();

    let app = App::new(options);
    let err = app
        .connect(Arc::new(FrameTransport::new(guest_port)))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::UnusableVersion(_)));
    assert_eq!(app.state(), sandbridge::endpoint::AppState::Closed);
}

#[tokio::test]
async fn missing_host_capabilities_rejects_and_closes_once() {
    // Hand-rolled host: answers initialize without hostCapabilities.
    let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
    tokio::spawn(async move {
        let mut rx = host_port.take_receiver().await.unwrap();
        while let Some(msg) = rx.recv().await {
            let obj = msg.payload.as_object().unwrap();
            if obj.get("method").and_then(|m| m.as_str()) == Some("ui/initialize") {
                let id = obj["id"].clone();
                host_port
                    .post(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": "v2",
                            "hostInfo": {"name": "H", "version": "1"}
                        }
                    }))
                    .await
                    .unwrap();
            }
        }
    });

    let app = App::new(AppOptions::new(app_info()));
    let transport = Arc::new(FrameTransport::new(guest_port));
    let err = app.connect(transport.clone() as Arc<dyn Transport>).await.unwrap_err();

    assert!(matches!(
        err,
        ConnectError::MissingField("hostCapabilities")
    ));
    assert_eq!(app.state(), sandbridge::endpoint::AppState::Closed);
    // The transport was closed by the failed connect; sends now fail
    let probe = sandbridge::core::envelope::Envelope::notification("ping-probe", None);
    assert!(transport.send(probe).await.is_err());
}

#[tokio::test]
async fn transport_close_during_connect_rejects_exactly_once() {
    let (host_port, guest_port) = MessagePort::pair("https://host.example", "null");
    let app = App::new(AppOptions::new(app_info()));

    let handle = {
        let transport = Arc::new(FrameTransport::new(guest_port));
        let app = Arc::new(app);
        let app_for_task = app.clone();
        let handle = tokio::spawn(async move { app_for_task.connect(transport).await });
        // Let the initialize request go out, then drop the host end
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(host_port);
        handle
    };

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ConnectError::Initialize(_))));
}

#[tokio::test]
async fn connect_twice_is_an_error() {
    let config = tools_host_config();
    let options = AppOptions::new(app_info());
    let (_bridge, app) = wired(config, options).await;

    let (_other_host, other_guest) = MessagePort::pair("https://host.example", "null");
    let err = app
        .connect(Arc::new(FrameTransport::new(other_guest)))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::InvalidState(_)));
}

#[tokio::test]
async fn app_capabilities_reach_the_bridge() {
    let config = tools_host_config();
    let options = AppOptions::new(app_info()).with_capabilities(AppCapabilities {
        tools: Some(CapabilityMarker {}),
        ..Default::default()
    });
    let (bridge, _app) = wired(config, options).await;
    bridge.wait_ready().await;
    assert!(bridge.app_capabilities().unwrap().tools.is_some());
}
