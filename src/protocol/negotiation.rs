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

//! Protocol version negotiation.
//!
//! The host keeps an immutable allow-list of versions it accepts, injected
//! at construction so tests can vary the set. Negotiation picks the guest's
//! requested version if supported, otherwise falls back to the host's
//! latest known version. Falling back is compatibility-preserving, not an
//! error.

use tracing::info;

use crate::core::constants::versions;
use crate::core::types::ProtocolVersion;

/// Immutable version allow-list, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersions(Vec<ProtocolVersion>);

impl SupportedVersions {
    /// Build from version tokens, newest first. An empty list is replaced
    /// by the crate's known versions.
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let list: Vec<ProtocolVersion> = tokens
            .into_iter()
            .map(|t| ProtocolVersion::new(t))
            .collect();
        if list.is_empty() {
            Self::default()
        } else {
            Self(list)
        }
    }

    pub fn latest(&self) -> &ProtocolVersion {
        // Non-empty by construction
        &self.0[0]
    }

    pub fn supports(&self, version: &ProtocolVersion) -> bool {
        self.0.contains(version)
    }

    /// Negotiate against the guest's requested version.
    pub fn negotiate(&self, requested: &ProtocolVersion) -> ProtocolVersion {
        if self.supports(requested) {
            requested.clone()
        } else {
            let fallback = self.latest().clone();
            info!(
                requested = %requested,
                negotiated = %fallback,
                "unsupported protocol version requested, falling back"
            );
            fallback
        }
    }
}

impl Default for SupportedVersions {
    fn default() -> Self {
        Self(
            versions::KNOWN
                .iter()
                .map(|v| ProtocolVersion::new(*v))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_version_wins_when_supported() {
        let versions = SupportedVersions::new(["v2", "v1"]);
        assert_eq!(
            versions.negotiate(&ProtocolVersion::new("v1")),
            ProtocolVersion::new("v1")
        );
    }

    #[test]
    fn unsupported_version_falls_back_to_latest() {
        let versions = SupportedVersions::new(["v1"]);
        assert_eq!(
            versions.negotiate(&ProtocolVersion::new("v99")),
            ProtocolVersion::new("v1")
        );
    }

    #[test]
    fn empty_list_uses_known_versions() {
        let list = SupportedVersions::new(Vec::<String>::new());
        assert_eq!(list.latest(), &ProtocolVersion::new(versions::LATEST));
    }
}
