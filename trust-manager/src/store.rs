// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Collaborator store interfaces
//!
//! The manager talks to persistence through these traits only. `NotFound`
//! is distinct from other failures so the manager can fail queue entries
//! terminally instead of retrying them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trust_types::{
    FlavorGroup, FlavorPart, HostManifest, QueueEntry, QueueStatus, SignedFlavor, TrustReport,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store failure: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a queue worker should retry after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A registered host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub name: String,
    /// Connection string for the host's trust agent
    pub connection_string: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hardware_uuid: Option<Uuid>,
}

#[async_trait]
pub trait HostStore: Send + Sync {
    async fn get(&self, host_id: Uuid) -> Result<Host, StoreError>;
    async fn list(&self) -> Result<Vec<Host>, StoreError>;
    /// Flavor groups the host is associated with
    async fn flavor_groups(&self, host_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait FlavorGroupStore: Send + Sync {
    async fn get(&self, group_id: Uuid) -> Result<FlavorGroup, StoreError>;
}

#[async_trait]
pub trait FlavorStore: Send + Sync {
    /// Flavors of a group, pre-grouped by flavor part
    async fn flavors_for_group(
        &self,
        group_id: Uuid,
    ) -> Result<BTreeMap<FlavorPart, Vec<SignedFlavor>>, StoreError>;
}

/// Last-known host state, including the manifest captured by the most
/// recent successful fetch.
#[async_trait]
pub trait HostStatusStore: Send + Sync {
    async fn latest_manifest(&self, host_id: Uuid) -> Result<Option<HostManifest>, StoreError>;
    async fn record_manifest(
        &self,
        host_id: Uuid,
        manifest: &HostManifest,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, report: &TrustReport) -> Result<(), StoreError>;
    async fn latest_for_host(&self, host_id: Uuid) -> Result<Option<TrustReport>, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub host_id: Option<Uuid>,
    pub status: Option<QueueStatus>,
}

/// Durable verification work queue.
///
/// The queue is the source of truth for outstanding work; `claim_next`
/// must be an atomic test-and-set so no entry is ever claimed twice.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Create an entry for the host, or OR the flags into an existing
    /// claimable/in-progress entry instead of duplicating it.
    async fn enqueue_or_merge(
        &self,
        host_id: Uuid,
        fetch_host_data: bool,
        force_update_cache: bool,
    ) -> Result<QueueEntry, StoreError>;

    /// Atomically claim the next claimable entry (oldest first), moving it
    /// to `InProgress`.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueEntry>, StoreError>;

    /// Mark an entry completed and drop it from the queue.
    async fn complete(&self, entry_id: Uuid) -> Result<(), StoreError>;

    /// Record a retryable failure: status `Failed`, retry count bumped,
    /// not claimable again before `not_before`.
    async fn fail_retry(
        &self,
        entry_id: Uuid,
        error: &str,
        not_before: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a terminal failure; the entry stays inspectable but is never
    /// claimed again.
    async fn fail_terminal(&self, entry_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Return a claimed entry to `New` (shutdown/recovery path).
    async fn release(&self, entry_id: Uuid) -> Result<(), StoreError>;

    async fn search(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>, StoreError>;

    /// Entries that are claimable now or currently in progress
    async fn outstanding(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
