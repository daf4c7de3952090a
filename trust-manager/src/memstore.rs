// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory store implementations
//!
//! Non-durable backends for every store trait. They serve the test suites
//! and small single-process deployments; production points the same traits
//! at a durable backend. The queue claim is a test-and-set under the store
//! lock, which gives the same exclusivity guarantee a row-level lock
//! would.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trust_types::{
    FlavorGroup, FlavorPart, HostManifest, QueueEntry, QueueStatus, SignedFlavor, TrustReport,
};
use uuid::Uuid;

use crate::store::{
    FlavorGroupStore, FlavorStore, Host, HostStatusStore, HostStore, QueueFilter, QueueStore,
    ReportStore, StoreError,
};

#[derive(Default)]
pub struct MemoryHostStore {
    hosts: Mutex<HashMap<Uuid, Host>>,
    groups: Mutex<HashMap<Uuid, Vec<Uuid>>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host: Host) {
        self.hosts.lock().unwrap().insert(host.id, host);
    }

    pub fn link_flavor_groups(&self, host_id: Uuid, group_ids: Vec<Uuid>) {
        self.groups.lock().unwrap().insert(host_id, group_ids);
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn get(&self, host_id: Uuid) -> Result<Host, StoreError> {
        self.hosts
            .lock()
            .unwrap()
            .get(&host_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("host", host_id))
    }

    async fn list(&self) -> Result<Vec<Host>, StoreError> {
        Ok(self.hosts.lock().unwrap().values().cloned().collect())
    }

    async fn flavor_groups(&self, host_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        if !self.hosts.lock().unwrap().contains_key(&host_id) {
            return Err(StoreError::not_found("host", host_id));
        }
        Ok(self
            .groups
            .lock()
            .unwrap()
            .get(&host_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryFlavorGroupStore {
    groups: Mutex<HashMap<Uuid, FlavorGroup>>,
}

impl MemoryFlavorGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, group: FlavorGroup) {
        self.groups.lock().unwrap().insert(group.id, group);
    }
}

#[async_trait]
impl FlavorGroupStore for MemoryFlavorGroupStore {
    async fn get(&self, group_id: Uuid) -> Result<FlavorGroup, StoreError> {
        self.groups
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("flavor group", group_id))
    }
}

#[derive(Default)]
pub struct MemoryFlavorStore {
    by_group: Mutex<HashMap<Uuid, Vec<SignedFlavor>>>,
}

impl MemoryFlavorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_group(&self, group_id: Uuid, flavor: SignedFlavor) {
        self.by_group
            .lock()
            .unwrap()
            .entry(group_id)
            .or_default()
            .push(flavor);
    }
}

#[async_trait]
impl FlavorStore for MemoryFlavorStore {
    async fn flavors_for_group(
        &self,
        group_id: Uuid,
    ) -> Result<BTreeMap<FlavorPart, Vec<SignedFlavor>>, StoreError> {
        let mut grouped: BTreeMap<FlavorPart, Vec<SignedFlavor>> = BTreeMap::new();
        if let Some(flavors) = self.by_group.lock().unwrap().get(&group_id) {
            for flavor in flavors {
                grouped
                    .entry(flavor.flavor.meta.part)
                    .or_default()
                    .push(flavor.clone());
            }
        }
        Ok(grouped)
    }
}

#[derive(Default)]
pub struct MemoryHostStatusStore {
    manifests: Mutex<HashMap<Uuid, HostManifest>>,
}

impl MemoryHostStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostStatusStore for MemoryHostStatusStore {
    async fn latest_manifest(&self, host_id: Uuid) -> Result<Option<HostManifest>, StoreError> {
        Ok(self.manifests.lock().unwrap().get(&host_id).cloned())
    }

    async fn record_manifest(
        &self,
        host_id: Uuid,
        manifest: &HostManifest,
    ) -> Result<(), StoreError> {
        self.manifests
            .lock()
            .unwrap()
            .insert(host_id, manifest.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReportStore {
    latest: Mutex<HashMap<Uuid, TrustReport>>,
    history: Mutex<Vec<TrustReport>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save(&self, report: &TrustReport) -> Result<(), StoreError> {
        self.latest
            .lock()
            .unwrap()
            .insert(report.host_id, report.clone());
        self.history.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn latest_for_host(&self, host_id: Uuid) -> Result<Option<TrustReport>, StoreError> {
        Ok(self.latest.lock().unwrap().get(&host_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    entries: Mutex<HashMap<Uuid, QueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue_or_merge(
        &self,
        host_id: Uuid,
        fetch_host_data: bool,
        force_update_cache: bool,
    ) -> Result<QueueEntry, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        // Merge into the live entry for this host, if any, instead of
        // queueing the same host twice.
        let existing = entries.values_mut().find(|e| {
            e.host_id == host_id
                && matches!(
                    e.status,
                    QueueStatus::New | QueueStatus::InProgress | QueueStatus::Failed
                )
                && !e.terminal
        });
        if let Some(entry) = existing {
            entry.merge_flags(fetch_host_data, force_update_cache);
            return Ok(entry.clone());
        }
        let entry = QueueEntry::new(host_id, fetch_host_data, force_update_cache);
        entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueEntry>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let next = entries
            .values_mut()
            .filter(|e| e.is_claimable(now))
            .min_by_key(|e| e.created_at);
        Ok(next.map(|entry| {
            entry.status = QueueStatus::InProgress;
            entry.updated_at = Utc::now();
            entry.clone()
        }))
    }

    async fn complete(&self, entry_id: Uuid) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .remove(&entry_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("queue entry", entry_id))
    }

    async fn fail_retry(
        &self,
        entry_id: Uuid,
        error: &str,
        not_before: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::not_found("queue entry", entry_id))?;
        entry.status = QueueStatus::Failed;
        entry.retry_count += 1;
        entry.not_before = not_before;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_terminal(&self, entry_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::not_found("queue entry", entry_id))?;
        entry.status = QueueStatus::Failed;
        entry.terminal = true;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn release(&self, entry_id: Uuid) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::not_found("queue entry", entry_id))?;
        entry.status = QueueStatus::New;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn search(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>, StoreError> {
        let entries = self.entries.lock().unwrap();
        let mut found: Vec<QueueEntry> = entries
            .values()
            .filter(|e| filter.host_id.map_or(true, |id| e.host_id == id))
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.created_at);
        Ok(found)
    }

    async fn outstanding(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .values()
            .filter(|e| e.is_claimable(now) || e.status == QueueStatus::InProgress)
            .count())
    }
}
