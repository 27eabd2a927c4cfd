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

//! sandbridge: a sandboxed guest-UI RPC bridge.
//!
//! This library lets an untrusted, dynamically loaded interactive UI (the
//! "guest") run inside a host application's frame and exchange structured
//! JSON-RPC messages with that host, which proxies selected calls to a
//! backend connection. The guest is held behind a double-frame isolation
//! relay so it can never address the host's real window directly.

pub mod config;
pub mod core;
pub mod endpoint;
pub mod protocol;
pub mod rpc;
pub mod sandbox;
pub mod telemetry;
pub mod transport;
