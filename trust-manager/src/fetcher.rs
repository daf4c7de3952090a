// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Manifest fetch collaborator
//!
//! Fetching talks to the trust agent on the host and is the only network
//! I/O on the verification path. The manager bounds every fetch with a
//! configured timeout; timeouts and unreachable hosts fail queue entries
//! retryably, a host that actively refuses fails them terminally.

use async_trait::async_trait;
use trust_types::HostManifest;

use crate::store::Host;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("manifest fetch timed out")]
    Timeout,

    #[error("host rejected the manifest request: {0}")]
    Rejected(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Rejected(_) => false,
        }
    }
}

/// Retrieves a fresh measurement snapshot from a host's trust agent.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch_manifest(&self, host: &Host) -> Result<HostManifest, FetchError>;
}
