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

//! Message envelope and schema validation.
//!
//! Given an arbitrary value received from a transport, [`classify`]
//! deterministically sorts it into exactly one of request, notification, or
//! response, or reports it invalid. Invalid input never panics and never
//! throws into dispatch; it surfaces as an [`EnvelopeError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::constants::jsonrpc;
use crate::core::errors::EnvelopeError;
use crate::core::types::validate_params;

/// Correlation id for a request. Serialized as a JSON number; ids issued by
/// one engine instance are strictly increasing and never reused while
/// outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A classified protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl Envelope {
    /// Construct a request envelope.
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope::Request(JsonRpcRequest {
            jsonrpc: jsonrpc::VERSION.to_string(),
            id,
            method: method.into(),
            params,
        })
    }

    /// Construct a notification envelope.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope::Notification(JsonRpcNotification {
            jsonrpc: jsonrpc::VERSION.to_string(),
            method: method.into(),
            params,
        })
    }

    /// Construct a success response envelope.
    pub fn response(id: RequestId, result: Value) -> Self {
        Envelope::Response(JsonRpcResponse {
            jsonrpc: jsonrpc::VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        })
    }

    /// Construct an error response envelope.
    pub fn error_response(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Envelope::Response(JsonRpcResponse {
            jsonrpc: jsonrpc::VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        })
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        // Serialization of plain structs over Value fields cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Deterministically classify an arbitrary inbound value.
///
/// A message with a recognized method but malformed params is invalid, not
/// silently coerced. A response must carry exactly one of result/error.
pub fn classify(value: Value) -> Result<Envelope, EnvelopeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EnvelopeError::NotAnEnvelope(short_preview(&value)))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(jsonrpc::VERSION) => {}
        Some(other) => return Err(EnvelopeError::BadMarker(other.to_string())),
        None => return Err(EnvelopeError::NotAnEnvelope("missing jsonrpc marker".into())),
    }

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        validate_params(&method, obj.get("params")).map_err(|detail| {
            EnvelopeError::MalformedParams {
                method: method.clone(),
                detail,
            }
        })?;

        let params = obj.get("params").cloned();
        return match obj.get("id") {
            Some(id) => {
                let id = parse_id(id)?;
                Ok(Envelope::Request(JsonRpcRequest {
                    jsonrpc: jsonrpc::VERSION.to_string(),
                    id,
                    method,
                    params,
                }))
            }
            None => Ok(Envelope::Notification(JsonRpcNotification {
                jsonrpc: jsonrpc::VERSION.to_string(),
                method,
                params,
            })),
        };
    }

    // No method: must be a response
    let id = match obj.get("id") {
        Some(id) => parse_id(id)?,
        None => {
            return Err(EnvelopeError::NotAnEnvelope(
                "neither method nor id present".into(),
            ))
        }
    };

    let result = obj.get("result").cloned();
    let error = match obj.get("error") {
        Some(e) => Some(serde_json::from_value::<JsonRpcError>(e.clone()).map_err(|e| {
            EnvelopeError::MalformedResponse {
                id: id.to_string(),
                detail: e.to_string(),
            }
        })?),
        None => None,
    };

    match (&result, &error) {
        (None, None) => Err(EnvelopeError::MalformedResponse {
            id: id.to_string(),
            detail: "neither result nor error present".into(),
        }),
        (Some(_), Some(_)) => Err(EnvelopeError::MalformedResponse {
            id: id.to_string(),
            detail: "both result and error present".into(),
        }),
        _ => Ok(Envelope::Response(JsonRpcResponse {
            jsonrpc: jsonrpc::VERSION.to_string(),
            id,
            result,
            error,
        })),
    }
}

fn parse_id(id: &Value) -> Result<RequestId, EnvelopeError> {
    id.as_u64()
        .map(RequestId::new)
        .ok_or_else(|| EnvelopeError::InvalidId(short_preview(id)))
}

fn short_preview(v: &Value) -> String {
    let mut s = v.to_string();
    if s.len() > 64 {
        s.truncate(64);
        s.push('…');
    }
    s
}
