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

//! Endpoint and sandbox configuration.
//!
//! The sandbox allow-list can come from a YAML file or from environment
//! variables; host configuration is built in code and injected, never read
//! from module-level constants, so tests can vary the version set.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::constants::{config as env_keys, limits, sandbox};
use crate::core::types::{HostCapabilities, Implementation};
use crate::protocol::negotiation::SupportedVersions;

/// Host-side (bridge) configuration. Immutable after construction.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub supported_versions: SupportedVersions,
    pub capabilities: HostCapabilities,
    pub host_info: Implementation,
    /// Bounded wait for the guest's teardown acknowledgement
    pub teardown_timeout: Duration,
}

impl HostConfig {
    pub fn new(host_info: Implementation) -> Self {
        Self {
            supported_versions: SupportedVersions::default(),
            capabilities: HostCapabilities::default(),
            host_info,
            teardown_timeout: limits::TEARDOWN_TIMEOUT,
        }
    }

    pub fn with_versions(mut self, versions: SupportedVersions) -> Self {
        self.supported_versions = versions;
        self
    }

    pub fn with_capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}

/// Sandbox proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Origins allowed to embed the proxy frame. A referrer outside this
    /// list is fatal.
    pub allowed_parent_origins: Vec<String>,
    /// Sandbox attribute applied to the nested frame unless the resource
    /// message overrides it
    #[serde(default = "default_sandbox_attribute")]
    pub default_sandbox_attribute: String,
}

fn default_sandbox_attribute() -> String {
    sandbox::DEFAULT_ATTRIBUTE.to_string()
}

impl SandboxConfig {
    pub fn new(allowed_parent_origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed_parent_origins: allowed_parent_origins
                .into_iter()
                .map(Into::into)
                .collect(),
            default_sandbox_attribute: default_sandbox_attribute(),
        }
    }

    /// Load from a YAML file.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&raw)?;
        Ok(config)
    }

    /// Load from the environment: a YAML file if one is pointed at,
    /// otherwise a comma-separated origin list.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(path) = env::var(env_keys::ENV_SANDBOX_CONFIG_PATH) {
            return Self::from_yaml_file(Path::new(&path));
        }
        let origins = env::var(env_keys::ENV_ALLOWED_ORIGINS).unwrap_or_default();
        Ok(Self::new(
            origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
        ))
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allowed_parent_origins.iter().any(|o| o == origin)
    }
}
