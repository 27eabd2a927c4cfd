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

//! Typed payloads for the protocol method surface.
//!
//! Field names follow the wire convention (camelCase). The host context body
//! is deliberately opaque: its field set is an external, evolving contract
//! and the protocol layer never reads inside it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::constants::{methods, resource, sandbox};

/// Newtype wrapper around Uuid for type-safe session identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Generate a new random SessionId
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = uuid::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Uuid::parse_str(&s).map(SessionId)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies either endpoint; exchanged during the handshake and immutable
/// after connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Marker object for a declared capability. Sparse by construction: absent
/// means unsupported, present (even empty) means supported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct CapabilityMarker {}

/// Capabilities the guest declares at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_change: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

/// Capabilities the host declares at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct HostCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_link: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_change: Option<CapabilityMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

/// Opaque protocol version token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(transparent)]
pub struct ProtocolVersion(String);

impl ProtocolVersion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProtocolVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// `ui/initialize` request params (guest -> host).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: ProtocolVersion,
    pub app_capabilities: AppCapabilities,
    pub app_info: Implementation,
}

/// `ui/initialize` result (host -> guest). `host_capabilities` and
/// `host_info` are required; a response missing either is a fatal handshake
/// error on the guest side, which is why they are not defaulted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: ProtocolVersion,
    pub host_capabilities: HostCapabilities,
    pub host_info: Implementation,
}

/// Complete tool input arguments, pushed once per invocation strictly before
/// the matching tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ToolInputNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// Streaming partial tool input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ToolInputPartialNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub name: String,
    /// Accumulated partial arguments as raw text; may not parse as JSON yet
    pub partial_arguments: String,
}

/// Tool execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ToolResultNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub result: Value,
}

/// Host context snapshot. The body is a versioned, opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub body: Value,
}

/// `ui/notifications/host-context-changed` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct HostContextChangedNotification {
    pub context: HostContext,
}

/// `ui/notifications/size-change` params. Bidirectional; the guest reports
/// its rendered size, the host reports the viewport granted to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SizeChangeNotification {
    pub width: f64,
    pub height: f64,
}

/// `ui/message` params: a chat-style message the guest sends into the
/// host's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct MessageParams {
    pub text: String,
}

/// `ui/open-link` params. The host may refuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct OpenLinkParams {
    pub url: String,
}

/// `tools/call` params, forwarded verbatim to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `ui/notifications/sandbox-resource-ready` params (host -> proxy): the
/// actual guest HTML and an optional replacement sandbox attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SandboxResourceReady {
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// Mapping from a backend tool to the guest resource the host should mount
/// for it. The URI is an opaque lookup key; the core never reads inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ResourceBinding {
    pub tool: String,
    pub resource_uri: String,
}

/// Whether a content type identifies guest HTML. The legacy type is treated
/// identically to the canonical one.
pub fn is_ui_html_mime(mime: &str) -> bool {
    mime == resource::MIME_UI_HTML || mime == resource::MIME_UI_HTML_LEGACY
}

/// Validate the params of a recognized method against its declared shape.
/// Unknown methods pass: the envelope layer cannot know every extension
/// method, and per-method handlers re-parse with full typing anyway.
pub fn validate_params(method: &str, params: Option<&Value>) -> Result<(), String> {
    fn check<T: serde::de::DeserializeOwned>(params: Option<&Value>) -> Result<(), String> {
        let value = params.cloned().unwrap_or(Value::Null);
        serde_json::from_value::<T>(value)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    match method {
        methods::INITIALIZE => check::<InitializeRequest>(params),
        methods::TOOL_INPUT => check::<ToolInputNotification>(params),
        methods::TOOL_INPUT_PARTIAL => check::<ToolInputPartialNotification>(params),
        methods::TOOL_RESULT => check::<ToolResultNotification>(params),
        methods::HOST_CONTEXT_CHANGED => check::<HostContextChangedNotification>(params),
        methods::SIZE_CHANGE => check::<SizeChangeNotification>(params),
        methods::MESSAGE => check::<MessageParams>(params),
        methods::OPEN_LINK => check::<OpenLinkParams>(params),
        methods::TOOLS_CALL => check::<CallToolParams>(params),
        sandbox::RESOURCE_READY => check::<SandboxResourceReady>(params),
        _ => Ok(()),
    }
}
