// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Verification manager
//!
//! Entry lifecycle: Requested -> Queued -> Claimed -> (Fetching) ->
//! Verifying -> Persisted | Failed(retryable) | Failed(terminal).
//!
//! Concurrency model: workers claim queue entries via the store's atomic
//! test-and-set; on top of that, a per-host lease serializes the
//! synchronous path against any in-flight asynchronous verification of the
//! same host. No global lock serializes verification across hosts.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trust_types::{HostManifest, QueueEntry, TrustReport};
use trust_verifier::{input_marker, FlavorGroupEvidence, TrustCache, TrustVerifier, VerifyError};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::fetcher::{FetchError, ManifestFetcher};
use crate::store::{
    FlavorGroupStore, FlavorStore, Host, HostStatusStore, HostStore, QueueFilter, QueueStore,
    ReportStore, StoreError,
};

/// How long an idle worker sleeps before re-polling the queue for entries
/// that became retry-eligible.
const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("host {0} not found")]
    HostNotFound(Uuid),

    #[error("no manifest available for host {0}; request a fetch")]
    ManifestUnavailable(Uuid),

    #[error("manager is shut down")]
    ShutDown,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Collaborators the manager is constructed over.
pub struct ManagerDeps {
    pub hosts: Arc<dyn HostStore>,
    pub flavor_groups: Arc<dyn FlavorGroupStore>,
    pub flavors: Arc<dyn FlavorStore>,
    pub host_status: Arc<dyn HostStatusStore>,
    pub reports: Arc<dyn ReportStore>,
    pub queue: Arc<dyn QueueStore>,
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub verifier: TrustVerifier,
}

struct ManagerInner {
    deps: ManagerDeps,
    config: ManagerConfig,
    cache: TrustCache,
    /// One async mutex per host; held across fetch + verify + persist
    leases: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: AtomicBool,
    work: Notify,
}

#[derive(Clone)]
pub struct TrustManager {
    inner: Arc<ManagerInner>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TrustManager {
    /// Construct the manager and start its worker pool. Must be called
    /// from within a tokio runtime.
    pub fn new(deps: ManagerDeps, config: ManagerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.trust_cache_capacity.max(1))
            .expect("capacity is at least 1");
        let inner = Arc::new(ManagerInner {
            deps,
            cache: TrustCache::new(capacity),
            leases: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            work: Notify::new(),
            config,
        });

        let mut workers = Vec::with_capacity(inner.config.workers);
        for worker_id in 0..inner.config.workers {
            let inner = inner.clone();
            workers.push(tokio::spawn(async move {
                inner.worker_loop(worker_id).await;
            }));
        }
        info!(workers = workers.len(), "trust manager started");

        Self {
            inner,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    /// Synchronous verification of one host on the caller's task.
    ///
    /// The host must exist. Without `fetch_host_data` the last-known
    /// manifest is used and its absence is an error. Does not enqueue.
    pub async fn verify_host(
        &self,
        host_id: Uuid,
        fetch_host_data: bool,
        force_update_cache: bool,
    ) -> Result<TrustReport, ManagerError> {
        if self.inner.is_shut_down() {
            return Err(ManagerError::ShutDown);
        }
        let host = self.inner.get_host(host_id).await?;

        let lease = self.inner.lease(host_id);
        let _guard = lease.lock().await;

        let manifest = if fetch_host_data {
            self.inner.fetch_and_record(&host).await?
        } else {
            self.inner
                .deps
                .host_status
                .latest_manifest(host_id)
                .await?
                .ok_or(ManagerError::ManifestUnavailable(host_id))?
        };

        self.inner
            .evaluate(host_id, &manifest, force_update_cache)
            .await
    }

    /// Queue hosts for asynchronous verification and return immediately.
    ///
    /// Repeated submissions for an already-queued host merge their flags
    /// into the live entry instead of duplicating it. A host that turns
    /// out not to exist fails its entry terminally when a worker picks it
    /// up. Fails fast after shutdown.
    pub async fn verify_hosts_async(
        &self,
        host_ids: &[Uuid],
        fetch_host_data: bool,
        force_update_cache: bool,
    ) -> Result<(), ManagerError> {
        if self.inner.is_shut_down() {
            return Err(ManagerError::ShutDown);
        }
        for &host_id in host_ids {
            self.inner
                .deps
                .queue
                .enqueue_or_merge(host_id, fetch_host_data, force_update_cache)
                .await?;
            debug!(host = %host_id, "verification queued");
        }
        self.inner.work.notify_waiters();
        Ok(())
    }

    /// Drain the queue on the caller's task: claim and process entries
    /// until nothing is claimable and nothing is in progress.
    pub async fn process_queue(&self) -> Result<(), ManagerError> {
        loop {
            if self.inner.is_shut_down() {
                return Err(ManagerError::ShutDown);
            }
            match self.inner.deps.queue.claim_next(Utc::now()).await? {
                Some(entry) => self.inner.process_entry(entry).await,
                None => {
                    if self.inner.deps.queue.outstanding(Utc::now()).await? == 0 {
                        return Ok(());
                    }
                    // workers still hold claims; wait for them to finish
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    }

    /// Signal workers to stop, wait for in-flight work to finish, and
    /// return still-claimed entries to the queue. Afterwards
    /// `verify_hosts_async` fails deterministically.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("trust manager shutting down");
        self.inner.work.notify_waiters();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker task ended abnormally: {e}");
            }
        }

        // Anything still marked in-progress was abandoned mid-claim;
        // return it so a restart can pick it up cleanly.
        let stuck = self
            .inner
            .deps
            .queue
            .search(&QueueFilter {
                host_id: None,
                status: Some(trust_types::QueueStatus::InProgress),
            })
            .await?;
        for entry in stuck {
            self.inner.deps.queue.release(entry.id).await?;
        }
        Ok(())
    }

    /// Current queue contents, for operator inspection.
    pub async fn queue_snapshot(&self) -> Result<Vec<QueueEntry>, ManagerError> {
        Ok(self
            .inner
            .deps
            .queue
            .search(&QueueFilter::default())
            .await?)
    }

    /// Drop a host's cached trust verdict, forcing the next verification
    /// to re-evaluate (e.g. after flavor group membership changed).
    pub fn invalidate_cached_trust(&self, host_id: Uuid) {
        self.inner.cache.invalidate(host_id);
    }
}

impl ManagerInner {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn lease(&self, host_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut leases = self.leases.lock().unwrap();
        leases.entry(host_id).or_default().clone()
    }

    async fn get_host(&self, host_id: Uuid) -> Result<Host, ManagerError> {
        match self.deps.hosts.get(host_id).await {
            Ok(host) => Ok(host),
            Err(e) if e.is_not_found() => Err(ManagerError::HostNotFound(host_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_and_record(&self, host: &Host) -> Result<HostManifest, ManagerError> {
        let manifest = match tokio::time::timeout(
            self.config.fetch_timeout(),
            self.deps.fetcher.fetch_manifest(host),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout.into()),
        };
        self.deps
            .host_status
            .record_manifest(host.id, &manifest)
            .await?;
        Ok(manifest)
    }

    /// Resolve flavor groups, consult the cache, verify and persist.
    /// Caller must hold the host's lease.
    async fn evaluate(
        &self,
        host_id: Uuid,
        manifest: &HostManifest,
        force_update_cache: bool,
    ) -> Result<TrustReport, ManagerError> {
        let evidence = self.gather_evidence(host_id).await?;
        let marker = input_marker(manifest, &evidence).map_err(VerifyError::Marker)?;

        if !force_update_cache {
            if let Some(report) = self.cache.lookup(host_id, &marker) {
                return Ok(report);
            }
            // cache miss can still be satisfied by the persisted report
            if let Some(report) = self.deps.reports.latest_for_host(host_id).await? {
                if report.input_marker == marker {
                    debug!(host = %host_id, "reusing persisted report for unchanged inputs");
                    self.cache.store(&report);
                    return Ok(report);
                }
            }
        }

        let report = self
            .deps
            .verifier
            .verify(host_id, manifest, &evidence)?;
        self.deps.reports.save(&report).await?;
        self.cache.store(&report);
        Ok(report)
    }

    async fn gather_evidence(
        &self,
        host_id: Uuid,
    ) -> Result<Vec<FlavorGroupEvidence>, ManagerError> {
        let group_ids = self.deps.hosts.flavor_groups(host_id).await?;
        let mut evidence = Vec::with_capacity(group_ids.len());
        for group_id in group_ids {
            let group = self.deps.flavor_groups.get(group_id).await?;
            let flavors = self.deps.flavors.flavors_for_group(group_id).await?;
            evidence.push(FlavorGroupEvidence { group, flavors });
        }
        Ok(evidence)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "queue worker started");
        loop {
            if self.is_shut_down() {
                break;
            }
            match self.deps.queue.claim_next(Utc::now()).await {
                Ok(Some(entry)) => self.process_entry(entry).await,
                Ok(None) => {
                    tokio::select! {
                        _ = self.work.notified() => {}
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                Err(e) => {
                    warn!(worker_id, "failed to poll queue: {e}");
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }
        debug!(worker_id, "queue worker stopped");
    }

    /// Process one claimed entry end to end. Never returns an error:
    /// every outcome is recorded on the entry.
    async fn process_entry(&self, entry: QueueEntry) {
        let lease = self.lease(entry.host_id);
        let _guard = lease.lock().await;

        if self.is_shut_down() {
            // claimed but not started; hand it back for clean recovery
            if let Err(e) = self.deps.queue.release(entry.id).await {
                warn!("failed to release queue entry: {e}");
            }
            return;
        }

        let host = match self.deps.hosts.get(entry.host_id).await {
            Ok(host) => host,
            Err(e) if e.is_not_found() => {
                self.fail_terminal(&entry, &format!("host {} not found", entry.host_id))
                    .await;
                return;
            }
            Err(e) => {
                self.fail(&entry, &e.to_string(), e.is_retryable()).await;
                return;
            }
        };

        let manifest = if entry.fetch_host_data {
            if self.is_shut_down() {
                // do not start a fetch once shutdown has been signaled
                if let Err(e) = self.deps.queue.release(entry.id).await {
                    warn!("failed to release queue entry: {e}");
                }
                return;
            }
            match self.fetch_and_record(&host).await {
                Ok(manifest) => manifest,
                Err(ManagerError::Fetch(e)) => {
                    self.fail(&entry, &e.to_string(), e.is_retryable()).await;
                    return;
                }
                Err(e) => {
                    self.fail(&entry, &e.to_string(), true).await;
                    return;
                }
            }
        } else {
            match self.deps.host_status.latest_manifest(entry.host_id).await {
                Ok(Some(manifest)) => manifest,
                Ok(None) => {
                    self.fail_terminal(
                        &entry,
                        &format!("no manifest available for host {}", entry.host_id),
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    self.fail(&entry, &e.to_string(), e.is_retryable()).await;
                    return;
                }
            }
        };

        match self
            .evaluate(entry.host_id, &manifest, entry.force_update_cache)
            .await
        {
            Ok(report) => {
                info!(
                    host = %entry.host_id,
                    trusted = report.trusted,
                    "verification completed"
                );
                if let Err(e) = self.deps.queue.complete(entry.id).await {
                    warn!("failed to complete queue entry: {e}");
                }
            }
            Err(ManagerError::Verify(e)) => {
                // structural problem; retrying will not fix the flavors
                self.fail_terminal(&entry, &e.to_string()).await;
            }
            Err(e) => {
                self.fail(&entry, &e.to_string(), true).await;
            }
        }
    }

    async fn fail(&self, entry: &QueueEntry, message: &str, retryable: bool) {
        if !retryable || entry.retry_count >= self.config.max_retries {
            self.fail_terminal(entry, message).await;
            return;
        }
        warn!(
            host = %entry.host_id,
            retry = entry.retry_count + 1,
            "verification failed, will retry: {message}"
        );
        let not_before = Utc::now() + self.config.retry_interval();
        if let Err(e) = self
            .deps
            .queue
            .fail_retry(entry.id, message, not_before)
            .await
        {
            warn!("failed to record retryable failure: {e}");
        }
    }

    async fn fail_terminal(&self, entry: &QueueEntry, message: &str) {
        error!(host = %entry.host_id, "verification failed terminally: {message}");
        if let Err(e) = self.deps.queue.fail_terminal(entry.id, message).await {
            warn!("failed to record terminal failure: {e}");
        }
    }
}
