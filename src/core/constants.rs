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

//! sandbridge constants - Single source of truth for all configuration values.
//!
//! This module centralizes method names, error codes, MIME types, and limits
//! to ensure consistency and maintainability.

/// JSON-RPC 2.0 error codes
pub mod jsonrpc {
    /// Protocol version marker
    pub const VERSION: &str = "2.0";
    /// Method not found (standard JSON-RPC)
    pub const ERROR_METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid request (standard JSON-RPC)
    pub const ERROR_INVALID_REQUEST: i32 = -32600;
    /// Invalid params (standard JSON-RPC)
    pub const ERROR_INVALID_PARAMS: i32 = -32602;
    /// Internal error (standard JSON-RPC)
    pub const ERROR_INTERNAL: i32 = -32603;
    /// Parse error (standard JSON-RPC)
    pub const ERROR_PARSE: i32 = -32700;
    /// Request cancelled locally (custom code)
    pub const ERROR_CANCELLED: i32 = -32800;
    /// Request timed out locally (custom code)
    pub const ERROR_TIMEOUT: i32 = -32801;
}

/// Protocol method names (requests unless noted)
pub mod methods {
    /// Guest -> Host handshake request
    pub const INITIALIZE: &str = "ui/initialize";
    /// Guest -> Host readiness notification
    pub const INITIALIZED: &str = "ui/notifications/initialized";
    /// Host -> Guest: complete tool input arguments (notification)
    pub const TOOL_INPUT: &str = "ui/notifications/tool-input";
    /// Host -> Guest: streaming partial tool input (notification)
    pub const TOOL_INPUT_PARTIAL: &str = "ui/notifications/tool-input-partial";
    /// Host -> Guest: tool execution result (notification)
    pub const TOOL_RESULT: &str = "ui/notifications/tool-result";
    /// Host -> Guest: theme/viewport/etc. change (notification)
    pub const HOST_CONTEXT_CHANGED: &str = "ui/notifications/host-context-changed";
    /// Bidirectional size-change notification, directionally scoped per sender
    pub const SIZE_CHANGE: &str = "ui/notifications/size-change";
    /// Guest -> Host chat-style message into the conversation
    pub const MESSAGE: &str = "ui/message";
    /// Guest -> Host request to open an external link
    pub const OPEN_LINK: &str = "ui/open-link";
    /// Host -> Guest teardown request, awaited before unmount
    pub const RESOURCE_TEARDOWN: &str = "ui/resource-teardown";
    /// Liveness check, always answered regardless of capabilities
    pub const PING: &str = "ping";

    /// Proxied backend: invoke a tool
    pub const TOOLS_CALL: &str = "tools/call";
    /// Proxied backend: list resources
    pub const RESOURCES_LIST: &str = "resources/list";
    /// Proxied backend: list resource templates
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    /// Proxied backend: list prompts
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Proxied backend notification: tool list changed
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    /// Proxied backend notification: resource list changed
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    /// Proxied backend notification: prompt list changed
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
}

/// Sandbox proxy control method names
pub mod sandbox {
    /// Proxy -> Host: relay frame is up, resource content may be sent
    pub const PROXY_READY: &str = "ui/notifications/sandbox-proxy-ready";
    /// Host -> Proxy: carries the guest HTML and optional sandbox override
    pub const RESOURCE_READY: &str = "ui/notifications/sandbox-resource-ready";
    /// Default sandbox attribute of the nested frame. Deliberately omits
    /// allow-top-navigation.
    pub const DEFAULT_ATTRIBUTE: &str = "allow-scripts allow-forms";
}

/// Guest resource conventions
pub mod resource {
    /// URI scheme prefix for guest UI resources (`ui://<namespace>/<name>`)
    pub const URI_SCHEME: &str = "ui://";
    /// Canonical content type for guest HTML resources
    pub const MIME_UI_HTML: &str = "text/html+mcp";
    /// Legacy content type, treated identically to the canonical one
    pub const MIME_UI_HTML_LEGACY: &str = "text/html+skybridge";
}

/// Size and time limits
pub mod limits {
    use std::time::Duration;

    /// Maximum accepted wire message size
    pub const MAX_MESSAGE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    /// Default per-request timeout
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    /// Bounded wait for the guest's teardown acknowledgement
    pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(3);
    /// Size-change notifications are coalesced to one per tick
    pub const FRAME_TICK: Duration = Duration::from_millis(16);
}

/// Environment variable names
pub mod config {
    pub const ENV_SANDBOX_CONFIG_PATH: &str = "SANDBRIDGE_SANDBOX_CONFIG";
    pub const ENV_ALLOWED_ORIGINS: &str = "SANDBRIDGE_ALLOWED_ORIGINS";
    pub const ENV_LOG_LEVEL: &str = "SANDBRIDGE_LOG_LEVEL";
    pub const ENV_LOG_FORMAT: &str = "SANDBRIDGE_LOG_FORMAT";
}

/// Protocol version tokens
pub mod versions {
    /// Versions the reference host accepts, newest first
    pub const KNOWN: &[&str] = &["v2", "v1"];
    /// Latest version this crate speaks
    pub const LATEST: &str = "v2";
}
