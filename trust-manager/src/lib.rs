// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Host trust verification manager
//!
//! Orchestrates verification work: callers submit host IDs, the manager
//! records durable queue entries, and a worker pool claims entries,
//! optionally re-fetches the host manifest, runs the verifier and persists
//! the trust report. Persistence and the manifest transport are behind
//! narrow async traits so an in-memory backend can serve tests and a
//! durable one can serve production without touching manager logic.

pub mod config;
pub mod fetcher;
pub mod manager;
pub mod memstore;
pub mod store;

pub use config::ManagerConfig;
pub use fetcher::{FetchError, ManifestFetcher};
pub use manager::{ManagerDeps, ManagerError, TrustManager};
pub use store::{
    FlavorGroupStore, FlavorStore, Host, HostStatusStore, HostStore, QueueFilter, QueueStore,
    ReportStore, StoreError,
};
